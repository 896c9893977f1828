//! Ingestor-facing side of the hub.
//!
//! Ingestors never call [`BroadcastHub::publish`] directly. They `offer`
//! messages into a bounded queue drained by a single fan-out task, so a
//! burst from one device can at worst drop lines, never stall a read loop.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{BroadcastHub, Message};

/// Messages buffered between ingestors and the fan-out task.
pub const PUBLISH_QUEUE: usize = 256;

/// Cheap-to-clone handle for offering messages to the hub.
#[derive(Debug, Clone)]
pub struct Publisher {
    sender: mpsc::Sender<Message>,
}

impl Publisher {
    /// Queues `text` for broadcast without waiting.
    ///
    /// Returns `false` if the message was dropped because the queue is full
    /// or the fan-out task has stopped.
    pub fn offer(&self, text: impl Into<Arc<str>>) -> bool {
        match self.sender.try_send(text.into()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("Publish queue full, message dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Spawns the fan-out task and returns the publisher feeding it.
///
/// The task runs until `cancel_token` fires or every [`Publisher`] is dropped,
/// then closes the hub so every subscriber session ends.
pub fn spawn_fanout(
    hub: BroadcastHub,
    queue: usize,
    cancel_token: CancellationToken,
) -> (Publisher, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel::<Message>(queue.max(1));

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Fan-out task shutting down");
                    break;
                }

                message = receiver.recv() => {
                    match message {
                        Some(message) => {
                            hub.publish(message);
                        }
                        None => {
                            debug!("All publishers dropped");
                            break;
                        }
                    }
                }
            }
        }
        hub.close();
    });

    (Publisher { sender }, handle)
}
