//! WebSocket subscribers.
//!
//! The socket is split: the sink becomes the session's transport and the
//! stream is drained on its own task so pings and close frames are handled.
//! When the peer goes away the reader cancels the session.

use std::borrow::Cow;

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tracing::debug;

use super::AppState;
use crate::hub::{
    CloseReason, SessionError, SessionEnd, SubscriberSession, SubscriberTransport,
    SLOW_CONSUMER_REASON,
};

/// Outbound half of a subscriber's WebSocket.
pub struct WsTransport {
    sink: SplitSink<WebSocket, Message>,
}

impl WsTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

fn close_frame(reason: CloseReason) -> CloseFrame<'static> {
    match reason {
        CloseReason::SlowConsumer => CloseFrame {
            code: close_code::POLICY,
            reason: Cow::Borrowed(SLOW_CONSUMER_REASON),
        },
        CloseReason::SendFailure => CloseFrame {
            code: close_code::ERROR,
            reason: Cow::Borrowed(""),
        },
        CloseReason::Shutdown => CloseFrame {
            code: close_code::AWAY,
            reason: Cow::Borrowed("server shutting down"),
        },
    }
}

#[async_trait]
impl SubscriberTransport for WsTransport {
    async fn send(&mut self, text: &str) -> Result<(), SessionError> {
        self.sink
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| SessionError::Send(e.to_string()))
    }

    async fn close(&mut self, reason: CloseReason) {
        let _ = self
            .sink
            .send(Message::Close(Some(close_frame(reason))))
            .await;
        let _ = self.sink.close().await;
    }
}

/// Runs one upgraded subscriber connection to completion.
pub(crate) async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();

    let session = SubscriberSession::attach(&state.hub, WsTransport::new(sink), state.send_timeout);
    let subscriber = session.subscriber_id();
    let control = session.control();
    debug!(subscriber, "WebSocket subscriber connected");

    let reader = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                // Subscribers have nothing to say; inbound data is ignored
                Ok(_) => {}
            }
        }
        control.peer_closed();
    });

    let end = session.run().await;
    reader.abort();

    match end {
        SessionEnd::PeerClosed => debug!(subscriber, "WebSocket subscriber disconnected"),
        other => debug!(subscriber, end = ?other, "WebSocket subscriber closed"),
    }
}
