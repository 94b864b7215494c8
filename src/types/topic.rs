//! Topic declarations.
//!
//! A [`Topic`] names one logical feed and carries everything the layer needs
//! to handle it: how its payloads are written into the cache, whether it is
//! partitioned by scope, whether it raises event bus notifications, and where
//! to poll it when the stream is down.

use serde::{Deserialize, Serialize};

use crate::error::{FeedError, Result};

/// Cache-write discipline of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopicKind {
    /// Each payload replaces the cached value.
    Snapshot,
    /// Each payload is one item prepended to a bounded, newest-first list.
    EventStream {
        /// Maximum retained items.
        max_len: usize,
    },
}

/// One named feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    /// Topic (and server event) name.
    pub name: String,
    /// Cache-write discipline.
    pub kind: TopicKind,
    /// Whether the topic is partitioned by scope (e.g. per wallet).
    pub scoped: bool,
    /// Event bus tag emitted when a payload changes the cache.
    pub notify: Option<String>,
    /// REST path polled while the stream is down, relative to the base URL.
    pub poll_path: Option<String>,
}

impl Topic {
    /// A snapshot topic.
    pub fn snapshot(name: impl Into<String>) -> Self {
        Self::with_kind(name, TopicKind::Snapshot)
    }

    /// An event-stream topic keeping at most `max_len` items.
    pub fn event_stream(name: impl Into<String>, max_len: usize) -> Self {
        Self::with_kind(name, TopicKind::EventStream { max_len })
    }

    fn with_kind(name: impl Into<String>, kind: TopicKind) -> Self {
        Self {
            name: name.into(),
            kind,
            scoped: false,
            notify: None,
            poll_path: None,
        }
    }

    /// Mark the topic as scope-partitioned.
    pub fn scoped(mut self) -> Self {
        self.scoped = true;
        self
    }

    /// Emit `tag` on the event bus whenever a payload changes the cache.
    pub fn notify(mut self, tag: impl Into<String>) -> Self {
        self.notify = Some(tag.into());
        self
    }

    /// Poll `path` (e.g. `"/feed?limit=20"`) while the stream is down.
    pub fn poll_path(mut self, path: impl Into<String>) -> Self {
        self.poll_path = Some(path.into());
        self
    }

    /// Reject names that cannot be placed verbatim in a path segment or the
    /// comma-joined topic list, and zero-length event-stream bounds.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(FeedError::InvalidArgument("topic name is empty".into()));
        }
        let url_safe = self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !url_safe {
            return Err(FeedError::InvalidArgument(format!(
                "topic name {:?} may only contain ASCII alphanumerics, '-', '_' and '.'",
                self.name
            )));
        }
        if let TopicKind::EventStream { max_len: 0 } = self.kind {
            return Err(FeedError::InvalidArgument(format!(
                "event-stream topic {:?} needs max_len >= 1",
                self.name
            )));
        }
        Ok(())
    }
}
