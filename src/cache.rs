//! The shared client cache and its write contract.
//!
//! Every subscription writes through [`CacheSink`]; the in-memory
//! implementation is [`MemoryCache`]. Entries are keyed by
//! [`CacheKey`] `(scope, topic)` and follow one of two disciplines:
//!
//! - **Snapshot**: [`CacheSink::replace`]: last write wins.
//! - **Event stream**: [`CacheSink::prepend`]: newest item first, oldest
//!   items dropped beyond the bound.
//!
//! Both writes are idempotent for detectable duplicates: writing the value
//! already cached (or prepending the item already at the head) reports
//! [`CacheWrite::Unchanged`] and publishes nothing.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::constants::channels::CACHE_UPDATE_CAPACITY;

// ---------------------------------------------------------------------------
// Keys and write outcomes
// ---------------------------------------------------------------------------

/// Cache key: `(scope, topic)`. Scope-independent topics use `scope: None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    /// Scope partition (e.g. wallet address).
    pub scope: Option<String>,
    /// Topic name.
    pub topic: String,
}

impl CacheKey {
    /// Key for `topic` under `scope`.
    pub fn new(scope: Option<&str>, topic: impl Into<String>) -> Self {
        Self {
            scope: scope.map(str::to_owned),
            topic: topic.into(),
        }
    }

    /// Key for a scope-independent topic.
    pub fn global(topic: impl Into<String>) -> Self {
        Self::new(None, topic)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{scope}/{}", self.topic),
            None => write!(f, "*/{}", self.topic),
        }
    }
}

/// Outcome of a cache write.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheWrite {
    /// Duplicate delivery; nothing observable changed.
    Unchanged,
    /// Snapshot replaced; carries the value it replaced.
    Replaced {
        /// Value held before the write.
        previous: Option<Value>,
    },
    /// Item prepended; carries the resulting length.
    Prepended {
        /// Length of the list after truncation.
        len: usize,
    },
}

impl CacheWrite {
    /// Whether the write changed the cache.
    pub fn is_changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Published on every observable change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheUpdate {
    /// Key that changed.
    pub key: CacheKey,
    /// What happened to it.
    pub kind: CacheUpdateKind,
}

/// Kind of [`CacheUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheUpdateKind {
    /// Whole value replaced.
    Replaced,
    /// Item prepended to an event-stream list.
    Prepended,
    /// Entry removed (scope change or explicit removal).
    Cleared,
}

// ---------------------------------------------------------------------------
// CacheSink
// ---------------------------------------------------------------------------

/// Write contract into the shared cache.
pub trait CacheSink: Send + Sync {
    /// Snapshot discipline: replace the value at `key`.
    fn replace(&self, key: &CacheKey, value: Value) -> CacheWrite;

    /// Event-stream discipline: put `item` at the head of the list at `key`
    /// and keep at most `max_len` items.
    fn prepend(&self, key: &CacheKey, item: Value, max_len: usize) -> CacheWrite;

    /// Remove every entry under `scope`. Returns how many were removed.
    fn clear_scope(&self, scope: &str) -> usize;
}

// ---------------------------------------------------------------------------
// MemoryCache
// ---------------------------------------------------------------------------

/// In-memory [`CacheSink`] shared by every subscription of an application.
///
/// Readers call [`get`](Self::get) and may [`subscribe`](Self::subscribe) to
/// change notifications to know when to re-read.
#[derive(Debug)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, Value>>,
    updates: broadcast::Sender<CacheUpdate>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_capacity(CACHE_UPDATE_CAPACITY)
    }
}

impl MemoryCache {
    /// An empty cache with the default update channel capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty cache whose update channel holds `capacity` messages.
    pub fn with_capacity(capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity.max(1));
        Self {
            entries: RwLock::new(HashMap::new()),
            updates,
        }
    }

    /// Clone of the value at `key`.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    /// Whether `key` holds a value.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<_> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove one entry, returning its value.
    pub fn remove(&self, key: &CacheKey) -> Option<Value> {
        let removed = self.entries.write().remove(key);
        if removed.is_some() {
            self.publish(key.clone(), CacheUpdateKind::Cleared);
        }
        removed
    }

    /// Receiver for change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheUpdate> {
        self.updates.subscribe()
    }

    fn publish(&self, key: CacheKey, kind: CacheUpdateKind) {
        // No receivers is fine: readers poll with `get`.
        let _ = self.updates.send(CacheUpdate { key, kind });
    }
}

impl CacheSink for MemoryCache {
    fn replace(&self, key: &CacheKey, value: Value) -> CacheWrite {
        let previous = {
            let mut entries = self.entries.write();
            if entries.get(key) == Some(&value) {
                return CacheWrite::Unchanged;
            }
            entries.insert(key.clone(), value)
        };
        self.publish(key.clone(), CacheUpdateKind::Replaced);
        CacheWrite::Replaced { previous }
    }

    fn prepend(&self, key: &CacheKey, item: Value, max_len: usize) -> CacheWrite {
        let max_len = max_len.max(1);
        let len = {
            let mut entries = self.entries.write();
            let slot = entries
                .entry(key.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
            let Some(items) = slot.as_array_mut() else {
                return CacheWrite::Unchanged;
            };
            if items.first() == Some(&item) {
                return CacheWrite::Unchanged;
            }
            items.insert(0, item);
            items.truncate(max_len);
            items.len()
        };
        self.publish(key.clone(), CacheUpdateKind::Prepended);
        CacheWrite::Prepended { len }
    }

    fn clear_scope(&self, scope: &str) -> usize {
        let removed: Vec<CacheKey> = {
            let mut entries = self.entries.write();
            let doomed: Vec<CacheKey> = entries
                .keys()
                .filter(|k| k.scope.as_deref() == Some(scope))
                .cloned()
                .collect();
            for key in &doomed {
                entries.remove(key);
            }
            doomed
        };
        let count = removed.len();
        for key in removed {
            self.publish(key, CacheUpdateKind::Cleared);
        }
        count
    }
}
