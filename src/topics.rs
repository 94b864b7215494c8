//! Topic multiplexing: subscription URLs and event routing.
//!
//! A [`TopicMultiplexer`] holds the declared topic set of one subscription
//! plus its current scope, and answers three questions:
//!
//! 1. **Where to connect**: [`stream_url`](TopicMultiplexer::stream_url):
//!    - dedicated: `GET {base}/sse/{topic}/{scope?}`
//!    - multiplexed: `GET {base}/sse/stream?topics=<comma-joined,sorted>&address=<scope?>`
//! 2. **What an inbound event means**: [`decode`](TopicMultiplexer::decode)
//!    turns a named event into an [`Envelope`] for an active topic.
//! 3. **How to write it**: [`apply`](TopicMultiplexer::apply) writes the
//!    envelope under `(scope, topic)` with the topic's discipline and emits
//!    the topic's notification when the write was observable.
//!
//! Scoped topics are only *active* while a scope is set. With no scope they
//! drop out of the URL, the routing table and the poll targets.

use chrono::Utc;
use serde_json::Value;
use url::Url;

use crate::bus::EventBus;
use crate::cache::{CacheKey, CacheSink, CacheWrite};
use crate::client::resolve_path;
use crate::constants::{
    KEEPALIVE_EVENTS, MULTIPLEX_PATH_SEGMENT, SCOPE_QUERY_PARAM, SSE_PATH_SEGMENT,
    TOPICS_QUERY_PARAM,
};
use crate::error::{FeedError, Result};
use crate::feed::polling::PollTarget;
use crate::types::{Envelope, Notification, Topic, TopicKind};

/// URL shape of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// One implicit topic on its own connection: `{base}/sse/{topic}/{scope?}`.
    Dedicated,
    /// Many topics on one connection: `{base}/sse/stream?topics=...`.
    Multiplexed,
}

/// Result of decoding one inbound event.
#[derive(Debug)]
pub enum Inbound {
    /// A payload for an active topic.
    Envelope(Envelope),
    /// Keepalive or an event name no active topic claims.
    Ignored,
    /// The payload was not valid JSON. The event is dropped; the connection
    /// stays healthy.
    Malformed(serde_json::Error),
}

/// Topic set + scope of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMultiplexer {
    endpoint: Endpoint,
    /// Declared topics, sorted by name, unique.
    declared: Vec<Topic>,
    scope: Option<String>,
}

impl TopicMultiplexer {
    /// A dedicated single-topic subscription.
    pub fn dedicated(topic: Topic, scope: Option<String>) -> Result<Self> {
        Self::build(Endpoint::Dedicated, vec![topic], scope)
    }

    /// A multiplexed subscription over `topics`.
    pub fn multiplexed(
        topics: impl IntoIterator<Item = Topic>,
        scope: Option<String>,
    ) -> Result<Self> {
        Self::build(Endpoint::Multiplexed, topics.into_iter().collect(), scope)
    }

    fn build(endpoint: Endpoint, mut topics: Vec<Topic>, scope: Option<String>) -> Result<Self> {
        for topic in &topics {
            topic.validate()?;
        }
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        let conflict = topics
            .windows(2)
            .find(|w| w[0].name == w[1].name && w[0] != w[1]);
        if let Some(pair) = conflict {
            return Err(FeedError::InvalidArgument(format!(
                "topic {:?} declared twice with different settings",
                pair[0].name
            )));
        }
        topics.dedup();
        if topics.is_empty() {
            return Err(FeedError::InvalidArgument("no topics declared".into()));
        }
        Ok(Self {
            endpoint,
            declared: topics,
            scope: normalize_scope(scope)?,
        })
    }

    /// URL shape.
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Current scope.
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Every declared topic, active or not.
    pub fn declared(&self) -> &[Topic] {
        &self.declared
    }

    /// Topics active under the current scope, sorted by name.
    pub fn topics(&self) -> impl Iterator<Item = &Topic> + '_ {
        let scoped_ok = self.scope.is_some();
        self.declared.iter().filter(move |t| scoped_ok || !t.scoped)
    }

    /// Whether no topic is active (nothing to connect to).
    pub fn is_idle(&self) -> bool {
        self.topics().next().is_none()
    }

    /// Same topics bound to another scope.
    pub fn rescoped(&self, scope: Option<String>) -> Result<Self> {
        Ok(Self {
            endpoint: self.endpoint,
            declared: self.declared.clone(),
            scope: normalize_scope(scope)?,
        })
    }

    /// Comma-joined, sorted names of the active topics.
    pub fn topic_list(&self) -> String {
        self.topics()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Cache key of `topic` under the current scope. Scope-independent topics
    /// are keyed without a scope even when one is set.
    pub fn cache_key(&self, topic: &Topic) -> CacheKey {
        let scope = if topic.scoped { self.scope() } else { None };
        CacheKey::new(scope, topic.name.clone())
    }

    // -----------------------------------------------------------------------
    // URLs
    // -----------------------------------------------------------------------

    /// Stream URL relative to `base`.
    pub fn stream_url(&self, base: &Url) -> Result<Url> {
        let mut url = base.clone();
        match self.endpoint {
            Endpoint::Dedicated => {
                let topic = self.topics().next().ok_or_else(|| {
                    FeedError::InvalidArgument("scoped topic has no scope".into())
                })?;
                let mut segments = path_segments(&mut url)?;
                segments.extend([SSE_PATH_SEGMENT, topic.name.as_str()]);
                if let Some(scope) = self.scope() {
                    segments.push(scope);
                }
            }
            Endpoint::Multiplexed => {
                if self.is_idle() {
                    return Err(FeedError::InvalidArgument("no active topics".into()));
                }
                path_segments(&mut url)?.extend([SSE_PATH_SEGMENT, MULTIPLEX_PATH_SEGMENT]);
                // Topic names are validated URL-safe; keep the commas literal.
                url.set_query(Some(&format!("{TOPICS_QUERY_PARAM}={}", self.topic_list())));
                if let Some(scope) = self.scope() {
                    url.query_pairs_mut().append_pair(SCOPE_QUERY_PARAM, scope);
                }
            }
        }
        Ok(url)
    }

    /// REST targets polled while the stream is down: every active topic that
    /// declares a poll path.
    pub fn poll_targets(&self, base: &Url) -> Result<Vec<PollTarget>> {
        self.topics()
            .filter_map(|topic| topic.poll_path.as_deref().map(|path| (topic, path)))
            .map(|(topic, path)| -> Result<PollTarget> {
                let mut url = resolve_path(base, path)?;
                if topic.scoped {
                    if let Some(scope) = self.scope() {
                        url.query_pairs_mut().append_pair(SCOPE_QUERY_PARAM, scope);
                    }
                }
                Ok(PollTarget {
                    topic: topic.name.clone(),
                    url,
                })
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    fn route(&self, event: &str) -> Option<&Topic> {
        if KEEPALIVE_EVENTS.iter().any(|k| *k == event) {
            return None;
        }
        match self.endpoint {
            // Every data event on a dedicated connection is the implicit topic.
            Endpoint::Dedicated => self.topics().next(),
            Endpoint::Multiplexed => self.topics().find(|t| t.name == event),
        }
    }

    /// Decode one inbound named event.
    pub fn decode(&self, event: &str, data: &str) -> Inbound {
        let Some(topic) = self.route(event) else {
            return Inbound::Ignored;
        };
        match serde_json::from_str::<Value>(data) {
            Ok(payload) => Inbound::Envelope(Envelope {
                topic: topic.name.clone(),
                payload,
            }),
            Err(e) => Inbound::Malformed(e),
        }
    }

    /// Write a pushed envelope with its topic's discipline.
    pub fn apply(&self, envelope: Envelope, cache: &dyn CacheSink, bus: &EventBus) -> CacheWrite {
        let Some(topic) = self.topics().find(|t| t.name == envelope.topic) else {
            return CacheWrite::Unchanged;
        };
        let key = self.cache_key(topic);
        let current = envelope.payload;
        let write = match topic.kind {
            TopicKind::Snapshot => cache.replace(&key, current.clone()),
            TopicKind::EventStream { max_len } => cache.prepend(&key, current.clone(), max_len),
        };
        self.notify(topic, key, &write, current, bus);
        write
    }

    /// Write a polled payload. Snapshot topics are replaced; event-stream
    /// topics expect a newest-first JSON array, truncated to the bound.
    pub fn apply_polled(
        &self,
        topic_name: &str,
        payload: Value,
        cache: &dyn CacheSink,
        bus: &EventBus,
    ) -> CacheWrite {
        let Some(topic) = self.topics().find(|t| t.name == topic_name) else {
            return CacheWrite::Unchanged;
        };
        let key = self.cache_key(topic);
        let current = match (topic.kind, payload) {
            (TopicKind::Snapshot, payload) => payload,
            (TopicKind::EventStream { max_len }, Value::Array(mut items)) => {
                items.truncate(max_len);
                Value::Array(items)
            }
            (TopicKind::EventStream { .. }, other) => {
                tracing::debug!(
                    topic = %topic.name,
                    payload = %other,
                    "polled payload is not a list, dropped"
                );
                return CacheWrite::Unchanged;
            }
        };
        let write = cache.replace(&key, current.clone());
        self.notify(topic, key, &write, current, bus);
        write
    }

    fn notify(
        &self,
        topic: &Topic,
        key: CacheKey,
        write: &CacheWrite,
        current: Value,
        bus: &EventBus,
    ) {
        let Some(tag) = &topic.notify else {
            return;
        };
        let previous = match write {
            CacheWrite::Unchanged => return,
            CacheWrite::Replaced { previous } => previous.clone(),
            CacheWrite::Prepended { .. } => None,
        };
        bus.emit(Notification {
            tag: tag.clone(),
            topic: key.topic,
            scope: key.scope,
            previous,
            current,
            emitted_at: Utc::now(),
        });
    }
}

pub(crate) fn normalize_scope(scope: Option<String>) -> Result<Option<String>> {
    match scope {
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) if s.contains('/') => Err(FeedError::InvalidArgument(format!(
            "scope {s:?} may not contain '/'"
        ))),
        other => Ok(other),
    }
}

fn path_segments(url: &mut Url) -> Result<url::PathSegmentsMut<'_>> {
    let mut segments = url
        .path_segments_mut()
        .map_err(|()| FeedError::InvalidArgument("base URL cannot carry path segments".into()))?;
    segments.pop_if_empty();
    Ok(segments)
}
