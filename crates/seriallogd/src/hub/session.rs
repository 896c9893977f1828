//! Subscriber sessions: draining one mailbox into one consumer connection.
//!
//! A session ends when the consumer goes away, when a send fails or exceeds
//! the send timeout, or when the hub evicts it for falling behind. Eviction
//! works by cancelling the session's [`SessionControl`], the same signal a
//! peer close raises, so there is one shutdown path. The subscription is
//! dropped (and the subscriber unregistered) exactly once when `run` returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{BroadcastHub, Subscription};

/// Longest a single message send may take.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Close reason given to evicted consumers.
pub const SLOW_CONSUMER_REASON: &str = "connection too slow to keep up with messages";

/// Errors a transport can report for a send.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Send failed: {0}")]
    Send(String),

    #[error("Connection closed")]
    Closed,
}

/// Why the server is closing a consumer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Mailbox overflowed
    SlowConsumer,
    /// A send failed or timed out
    SendFailure,
    /// The hub was closed for shutdown
    Shutdown,
}

/// Outbound half of a consumer connection.
#[async_trait]
pub trait SubscriberTransport: Send {
    /// Delivers one message.
    async fn send(&mut self, text: &str) -> Result<(), SessionError>;

    /// Closes the connection. Best effort.
    async fn close(&mut self, reason: CloseReason);
}

/// Cancellation handle shared between a session, its connection reader and
/// the hub's disconnect action.
#[derive(Debug, Clone, Default)]
pub struct SessionControl {
    closed: CancellationToken,
    evicted: Arc<AtomicBool>,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forcibly ends the session because it fell behind.
    pub fn force_close(&self) {
        self.evicted.store(true, Ordering::SeqCst);
        self.closed.cancel();
    }

    /// Signals that the consumer disconnected.
    pub fn peer_closed(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        self.closed.cancelled().await
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Consumer disconnected
    PeerClosed,
    /// Hub evicted the session for a full mailbox
    Evicted,
    /// A send exceeded the send timeout
    SendTimeout,
    /// A send failed
    SendFailed(String),
    /// Hub closed every mailbox
    HubClosed,
}

/// Drives one subscriber: mailbox in, transport out.
pub struct SubscriberSession<T> {
    subscription: Subscription,
    transport: T,
    control: SessionControl,
    send_timeout: Duration,
}

impl<T: SubscriberTransport> SubscriberSession<T> {
    /// Subscribes to `hub` with an overflow action that force-closes this session.
    pub fn attach(hub: &BroadcastHub, transport: T, send_timeout: Duration) -> Self {
        let control = SessionControl::new();
        let on_overflow = control.clone();
        let subscription = hub.subscribe(move || on_overflow.force_close());

        Self {
            subscription,
            transport,
            control,
            send_timeout,
        }
    }

    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    pub fn subscriber_id(&self) -> u64 {
        self.subscription.id()
    }

    /// Runs until the session ends, then unregisters from the hub.
    pub async fn run(mut self) -> SessionEnd {
        let end = self.deliver().await;

        let reason = match end {
            SessionEnd::Evicted => Some(CloseReason::SlowConsumer),
            SessionEnd::SendTimeout | SessionEnd::SendFailed(_) => Some(CloseReason::SendFailure),
            SessionEnd::HubClosed => Some(CloseReason::Shutdown),
            SessionEnd::PeerClosed => None,
        };
        if let Some(reason) = reason {
            let _ = timeout(self.send_timeout, self.transport.close(reason)).await;
        }

        debug!(subscriber = self.subscription.id(), end = ?end, "Session ended");
        end
    }

    async fn deliver(&mut self) -> SessionEnd {
        loop {
            let message = tokio::select! {
                biased;

                _ = self.control.cancelled() => return self.cancelled_end(),

                message = self.subscription.recv() => match message {
                    Some(message) => message,
                    None => return SessionEnd::HubClosed,
                },
            };

            tokio::select! {
                biased;

                _ = self.control.cancelled() => return self.cancelled_end(),

                sent = timeout(self.send_timeout, self.transport.send(&message)) => match sent {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return SessionEnd::SendFailed(e.to_string()),
                    Err(_) => return SessionEnd::SendTimeout,
                },
            }
        }
    }

    fn cancelled_end(&self) -> SessionEnd {
        if self.control.is_evicted() {
            SessionEnd::Evicted
        } else {
            SessionEnd::PeerClosed
        }
    }
}
