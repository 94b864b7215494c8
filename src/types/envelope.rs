//! Decoded pushes and notifications.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// One decoded server push: a topic name plus its JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Topic the payload belongs to.
    pub topic: String,
    /// Decoded payload: a full value for snapshot topics, a single item for
    /// event-stream topics.
    pub payload: Value,
}

/// A fire-and-forget signal published on the [`EventBus`](crate::bus::EventBus)
/// when a topic's payload represents a discrete occurrence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Tag declared on the topic (e.g. `"feed:new-item"`).
    pub tag: String,
    /// Topic that produced the payload.
    pub topic: String,
    /// Scope of the cache entry that was written.
    pub scope: Option<String>,
    /// Previous cached value, for snapshot topics.
    pub previous: Option<Value>,
    /// The new value (snapshot) or the new item (event stream).
    pub current: Value,
    /// When the notification was emitted.
    pub emitted_at: DateTime<Utc>,
}
