//! Fire-and-forget notification channel.
//!
//! The [`EventBus`] tells presentation code that "something new just arrived"
//! so it can run a transient effect (e.g. a highlight) without diffing the
//! cache. It has no delivery guarantee and no backlog beyond the broadcast
//! buffer: receivers that do not exist when a notification is emitted never
//! see it, and slow receivers may lag. The cache write already carries the
//! durable state.

use tokio::sync::broadcast;

use crate::constants::channels::NOTIFICATION_CAPACITY;
use crate::types::Notification;

/// Cloneable handle to the notification channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Notification>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(NOTIFICATION_CAPACITY)
    }
}

impl EventBus {
    /// A bus whose receivers buffer up to `capacity` notifications.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a notification. Returns how many receivers it reached.
    pub fn emit(&self, notification: Notification) -> usize {
        tracing::trace!(tag = %notification.tag, topic = %notification.topic, "notify");
        self.tx.send(notification).unwrap_or(0)
    }

    /// Receiver for notifications emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
