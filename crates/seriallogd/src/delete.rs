//! Delete requests from subscribers to ingestors.
//!
//! A request is a bare device index pushed onto a broadcast channel. Every
//! active ingestor holds a [`DeleteListener`] and reacts only to its own
//! index. Nothing is queued for ingestors that are not currently listening,
//! and callers never learn whether anyone acted on the request.

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

/// Requests buffered per listener before old ones are dropped.
const DELETE_BUFFER: usize = 16;

/// Fan-out point for delete requests.
#[derive(Debug, Clone)]
pub struct DeleteCoordinator {
    sender: broadcast::Sender<usize>,
}

impl DeleteCoordinator {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(DELETE_BUFFER);
        Self { sender }
    }

    /// Signals that the log for `index` should be deleted.
    ///
    /// Never blocks. Returns `true` if at least one ingestor was listening,
    /// which says nothing about whether the matching one was.
    pub fn request_delete(&self, index: usize) -> bool {
        match self.sender.send(index) {
            Ok(listeners) => {
                debug!(index, listeners, "Delete request sent");
                true
            }
            Err(_) => {
                debug!(index, "Delete request dropped, no ingestor listening");
                false
            }
        }
    }

    /// Starts listening for requests addressed to `index`.
    ///
    /// Only requests sent after this call are observed.
    pub fn listen(&self, index: usize) -> DeleteListener {
        DeleteListener {
            index,
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for DeleteCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// One ingestor's view of the delete channel.
#[derive(Debug)]
pub struct DeleteListener {
    index: usize,
    receiver: broadcast::Receiver<usize>,
}

impl DeleteListener {
    /// Waits for a request matching this listener's index.
    ///
    /// Returns `false` if the coordinator is gone. Cancel-safe, so it can sit
    /// in a `select!` next to a device read.
    pub async fn requested(&mut self) -> bool {
        loop {
            match self.receiver.recv().await {
                Ok(index) if index == self.index => return true,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(index = self.index, skipped, "Delete listener lagged");
                }
                Err(RecvError::Closed) => return false,
            }
        }
    }

    /// Non-blocking check for an already delivered matching request.
    pub fn try_requested(&mut self) -> bool {
        loop {
            match self.receiver.try_recv() {
                Ok(index) if index == self.index => return true,
                Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return false,
            }
        }
    }
}
