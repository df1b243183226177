//! Fan-out of session and tree events to subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use treekeeper_types::KeeperEvent;

/// Depth of each subscriber's channel. A subscriber that falls further behind
/// than this loses events rather than stalling the publisher.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

/// An opaque handle identifying one subscription.
///
/// Dropping the handle does not unsubscribe; pass it back to
/// [`EventBroadcaster::unsubscribe`], or drop the receiver and let the
/// broadcaster prune the dead channel on the next publish.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
}

/// Delivers published events to every current subscriber.
///
/// Delivery per subscriber follows publish order (FIFO channel). Publishing
/// never blocks and observer failures never propagate to the publisher: a full
/// channel drops the event for that subscriber with a warning, a closed channel
/// removes the subscription.
#[derive(Debug, Default)]
pub struct EventBroadcaster {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<KeeperEvent>>>,
    next_id: AtomicU64,
}

impl EventBroadcaster {
    /// Creates a broadcaster with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber and returns its handle and event receiver.
    pub fn subscribe(&self) -> (Subscription, mpsc::Receiver<KeeperEvent>) {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().insert(id, sender);
        (Subscription { id }, receiver)
    }

    /// Removes a subscription. Unknown handles are ignored.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.subscribers.lock().remove(&subscription.id);
    }

    /// Delivers an event to all current subscribers.
    pub fn publish(&self, event: impl Into<KeeperEvent>) {
        let event = event.into();
        let mut dead = Vec::new();
        {
            let subscribers = self.subscribers.lock();
            for (&id, sender) in subscribers.iter() {
                match sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(subscriber = id, "subscriber channel full, dropping event");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        dead.push(id);
                    }
                }
            }
        }
        if !dead.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for id in dead {
                debug!(subscriber = id, "removing closed subscriber");
                subscribers.remove(&id);
            }
        }
    }

    /// Removes every subscription at once. Used when a connection closes.
    pub fn clear(&self) {
        self.subscribers.lock().clear();
    }

    /// Returns the number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Returns `true` if nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
