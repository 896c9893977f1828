//! Publish/subscribe hub for live device lines.
//!
//! Every subscriber gets a bounded mailbox. Publishing is a `try_send` into
//! each mailbox, so it never waits on a subscriber. A subscriber whose
//! mailbox is full loses the message and has its disconnect action fired
//! on a separate task; other subscribers are unaffected.
//!
//! # Architecture
//!
//! ```text
//!  ingestors ──offer──▶ Publisher ──▶ fan-out task ──publish──▶ BroadcastHub
//!                        (queue)                                   │
//!                                              ┌───────────────────┼──────────┐
//!                                              ▼                   ▼          ▼
//!                                          mailbox(15)        mailbox(15)    ...
//!                                              │                   │
//!                                      SubscriberSession   SubscriberSession
//! ```
//!
//! The subscriber map sits behind one mutex that is only held while the map
//! is read or mutated; no await point or I/O happens under it.

mod publisher;
mod session;

pub use publisher::{spawn_fanout, Publisher, PUBLISH_QUEUE};
pub use session::{
    CloseReason, SessionControl, SessionEnd, SessionError, SubscriberSession,
    SubscriberTransport, SEND_TIMEOUT, SLOW_CONSUMER_REASON,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Messages buffered per subscriber before it is evicted.
pub const MAILBOX_CAPACITY: usize = 15;

/// A published message. Shared by every mailbox it lands in.
pub type Message = Arc<str>;

/// Unique identifier for a subscriber.
pub type SubscriberId = u64;

/// Action fired when a subscriber cannot keep up.
pub type DisconnectAction = Arc<dyn Fn() + Send + Sync>;

struct SubscriberEntry {
    mailbox: mpsc::Sender<Message>,
    on_overflow: DisconnectAction,
    evicted: bool,
}

struct HubInner {
    subscribers: Mutex<HashMap<SubscriberId, SubscriberEntry>>,
    next_id: AtomicU64,
    mailbox_capacity: usize,
    closed: AtomicBool,
}

/// What a single `publish` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Mailboxes the message was queued in
    pub delivered: usize,
    /// Subscribers whose disconnect action was fired by this publish
    pub evicted: usize,
}

/// Live subscriber set. Cheap to clone.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::with_mailbox_capacity(MAILBOX_CAPACITY)
    }

    pub fn with_mailbox_capacity(mailbox_capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                mailbox_capacity: mailbox_capacity.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn mailbox_capacity(&self) -> usize {
        self.inner.mailbox_capacity
    }

    /// Registers a subscriber.
    ///
    /// `on_overflow` is fired (once, on its own task) the first time a
    /// publish finds this subscriber's mailbox full. The subscriber stays
    /// registered until its [`Subscription`] is dropped.
    ///
    /// Subscribing to a closed hub yields an already closed mailbox.
    pub fn subscribe<F>(&self, on_overflow: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.mailbox_capacity);

        let total = {
            let mut subs = self.inner.subscribers.lock();
            if self.inner.closed.load(Ordering::SeqCst) {
                debug!(subscriber = id, "Hub closed, subscriber rejected");
                return Subscription {
                    id,
                    mailbox: rx,
                    hub: self.clone(),
                };
            }
            subs.insert(
                id,
                SubscriberEntry {
                    mailbox: tx,
                    on_overflow: Arc::new(on_overflow),
                    evicted: false,
                },
            );
            subs.len()
        };
        debug!(subscriber = id, total, "Subscriber added");

        Subscription {
            id,
            mailbox: rx,
            hub: self.clone(),
        }
    }

    /// Offers `message` to every subscriber without waiting.
    pub fn publish(&self, message: Message) -> PublishReport {
        let mut report = PublishReport::default();
        let mut overflowed: Vec<(SubscriberId, DisconnectAction)> = Vec::new();

        {
            let mut subs = self.inner.subscribers.lock();
            for (&id, entry) in subs.iter_mut() {
                match entry.mailbox.try_send(Arc::clone(&message)) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        if !entry.evicted {
                            entry.evicted = true;
                            overflowed.push((id, Arc::clone(&entry.on_overflow)));
                        }
                    }
                    // Session already gone; it unregisters itself
                    Err(TrySendError::Closed(_)) => {}
                }
            }
        }

        report.evicted = overflowed.len();
        for (id, action) in overflowed {
            warn!(subscriber = id, "Subscriber too slow, disconnecting");
            fire(action);
        }

        report
    }

    /// Removes a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.inner.subscribers.lock().remove(&id).is_some();
        if removed {
            debug!(subscriber = id, "Subscriber removed");
        }
        removed
    }

    /// Drops every mailbox so each subscriber sees its stream end.
    ///
    /// Queued messages are still delivered first. Returns the number of
    /// subscribers that were registered.
    pub fn close(&self) -> usize {
        let drained = {
            let mut subs = self.inner.subscribers.lock();
            self.inner.closed.store(true, Ordering::SeqCst);
            std::mem::take(&mut *subs)
        };
        debug!(subscribers = drained.len(), "Hub closed");
        drained.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.inner.subscribers.lock().contains_key(&id)
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a disconnect action off the publisher's path.
fn fire(action: DisconnectAction) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { action() });
        }
        Err(_) => action(),
    }
}

/// A registered subscriber's mailbox.
///
/// Dropping it unregisters the subscriber.
pub struct Subscription {
    id: SubscriberId,
    mailbox: mpsc::Receiver<Message>,
    hub: BroadcastHub,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next message. Cancel-safe.
    pub async fn recv(&mut self) -> Option<Message> {
        self.mailbox.recv().await
    }

    /// Takes a queued message without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.mailbox.try_recv().ok()
    }

    /// Number of messages waiting in the mailbox.
    pub fn pending(&self) -> usize {
        self.mailbox.len()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}
