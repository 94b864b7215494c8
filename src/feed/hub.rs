//! Shared provider fanning two multiplexed streams out to many topics.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────────────────────────────┐
//!            │               FeedHub                │
//!            │   (topic split, scope, shared cache) │
//!            └──────┬──────────────────────┬────────┘
//!                   │                      │
//!        global subscription      scoped subscription
//!      (scope-independent topics)  (scope-aware topics)
//!                   │                      │
//!                   └──► Arc<MemoryCache> ◄┘ ──► EventBus
//! ```
//!
//! Scope-independent topics share one connection that is never touched by a
//! scope change. Scope-aware topics share a second connection that is
//! re-subscribed whenever the scope changes; with no scope it holds no
//! connection at all and its cached entries are cleared.
//!
//! # Quick Start
//!
//! ```no_run
//! use livefeed::{FeedConfig, FeedHub};
//! use livefeed::types::Topic;
//!
//! # #[tokio::main]
//! # async fn main() -> livefeed::Result<()> {
//! let config = FeedConfig::new("https://api.example.com")?;
//! let mut hub = FeedHub::builder(config)
//!     .topic(Topic::snapshot("prices").poll_path("/prices"))
//!     .topic(Topic::snapshot("positions").scoped().poll_path("/positions"))
//!     .topic(Topic::event_stream("feed", 20).notify("feed:new-item"))
//!     .build()?;
//!
//! let mut notifications = hub.bus().subscribe();
//! tokio::spawn(async move {
//!     while let Ok(n) = notifications.recv().await {
//!         println!("{} {}", n.tag, n.current);
//!     }
//! });
//!
//! hub.set_scope(Some("0xAbC".into()))?;
//! println!("{:?}", hub.get("positions"));
//!
//! hub.dispose().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde_json::Value;

use crate::bus::EventBus;
use crate::cache::{CacheKey, MemoryCache};
use crate::client::FeedClient;
use crate::config::FeedConfig;
use crate::error::Result;
use crate::feed::polling::PollSource;
use crate::feed::subscription::ResilientSubscription;
use crate::stream::StreamConnector;
use crate::stream::sse::SseConnector;
use crate::topics::{TopicMultiplexer, normalize_scope};
use crate::types::{SubscriptionStatus, Topic};
use crate::visibility::VisibilityController;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`FeedHub`].
pub struct FeedHubBuilder {
    config: FeedConfig,
    topics: Vec<Topic>,
    scope: Option<String>,
    cache: Option<Arc<MemoryCache>>,
    bus: Option<EventBus>,
    visibility: Option<VisibilityController>,
    connector: Option<Arc<dyn StreamConnector>>,
    poller: Option<Arc<dyn PollSource>>,
}

impl FeedHubBuilder {
    /// Start building a hub for `config`.
    pub fn new(config: FeedConfig) -> Self {
        Self {
            config,
            topics: Vec::new(),
            scope: None,
            cache: None,
            bus: None,
            visibility: None,
            connector: None,
            poller: None,
        }
    }

    /// Declare one topic.
    pub fn topic(mut self, topic: Topic) -> Self {
        self.topics.push(topic);
        self
    }

    /// Declare several topics.
    pub fn topics(mut self, topics: impl IntoIterator<Item = Topic>) -> Self {
        self.topics.extend(topics);
        self
    }

    /// Initial scope. Default: none.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Share an existing cache. Default: a fresh [`MemoryCache`] sized from
    /// the configuration.
    pub fn cache(mut self, cache: Arc<MemoryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Share an existing event bus.
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Follow an existing visibility controller. Default: a private one that
    /// starts visible.
    pub fn visibility(mut self, visibility: VisibilityController) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// Use a specific transport for both connections.
    pub fn connector(mut self, connector: Arc<dyn StreamConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Use a specific poll source for both connections.
    pub fn poller(mut self, poller: Arc<dyn PollSource>) -> Self {
        self.poller = Some(poller);
        self
    }

    /// Split the topics, then spawn both subscriptions.
    ///
    /// Fails with [`FeedError::Config`](crate::FeedError::Config) when no
    /// base URL is configured, and with
    /// [`FeedError::InvalidArgument`](crate::FeedError::InvalidArgument) for
    /// invalid topics or scope. Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<FeedHub> {
        self.config.require_base_url()?;
        let scope = normalize_scope(self.scope)?;

        let (scoped, global): (Vec<Topic>, Vec<Topic>) =
            self.topics.into_iter().partition(|t| t.scoped);
        let global = (!global.is_empty())
            .then(|| TopicMultiplexer::multiplexed(global, None))
            .transpose()?;
        let scoped = (!scoped.is_empty())
            .then(|| TopicMultiplexer::multiplexed(scoped, scope.clone()))
            .transpose()?;

        let capacity = self.config.cache_update_capacity;
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryCache::with_capacity(capacity)));
        let bus = self
            .bus
            .unwrap_or_else(|| EventBus::new(self.config.notification_capacity));
        let visibility = self.visibility.unwrap_or_default();
        let connector = match self.connector {
            Some(connector) => connector,
            None => Arc::new(SseConnector::default()),
        };
        let poller = match self.poller {
            Some(poller) => poller,
            None => Arc::new(FeedClient::new(&self.config)?),
        };

        let spawn = |multiplexer: TopicMultiplexer, label: &str| {
            ResilientSubscription::builder(self.config.clone(), multiplexer, cache.clone())
                .connector(connector.clone())
                .poller(poller.clone())
                .bus(bus.clone())
                .visibility(visibility.subscribe())
                .label(label)
                .spawn()
        };
        let global = global.map(|m| spawn(m, "hub:global")).transpose()?;
        let scoped = scoped.map(|m| spawn(m, "hub:scoped")).transpose()?;

        tracing::info!(
            global = global.is_some(),
            scoped = scoped.is_some(),
            scope = scope.as_deref().unwrap_or("-"),
            "Feed hub started"
        );

        Ok(FeedHub {
            global,
            scoped,
            scope,
            cache,
            bus,
            visibility,
        })
    }
}

// ---------------------------------------------------------------------------
// FeedHub
// ---------------------------------------------------------------------------

/// Shared provider for an application's topics.
#[derive(Debug)]
pub struct FeedHub {
    global: Option<ResilientSubscription>,
    scoped: Option<ResilientSubscription>,
    scope: Option<String>,
    cache: Arc<MemoryCache>,
    bus: EventBus,
    visibility: VisibilityController,
}

impl FeedHub {
    /// Start a [`FeedHubBuilder`].
    pub fn builder(config: FeedConfig) -> FeedHubBuilder {
        FeedHubBuilder::new(config)
    }

    /// Build a hub over `topics` with default collaborators.
    pub fn new(config: FeedConfig, topics: impl IntoIterator<Item = Topic>) -> Result<Self> {
        Self::builder(config).topics(topics).build()
    }

    /// The shared cache.
    pub fn cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }

    /// The notification bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The visibility controller every subscription of the hub follows.
    pub fn visibility(&self) -> &VisibilityController {
        &self.visibility
    }

    /// Current scope.
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Status of the scope-independent subscription, if any topic needs it.
    pub fn global_status(&self) -> Option<SubscriptionStatus> {
        self.global.as_ref().map(ResilientSubscription::status)
    }

    /// Status of the scope-aware subscription, if any topic needs it.
    pub fn scoped_status(&self) -> Option<SubscriptionStatus> {
        self.scoped.as_ref().map(ResilientSubscription::status)
    }

    /// The scope-independent subscription.
    pub fn global(&self) -> Option<&ResilientSubscription> {
        self.global.as_ref()
    }

    /// The scope-aware subscription.
    pub fn scoped(&self) -> Option<&ResilientSubscription> {
        self.scoped.as_ref()
    }

    /// Cached value of `topic` under the current scope.
    ///
    /// Scope-aware topics resolve to `None` while no scope is set.
    pub fn get(&self, topic: &str) -> Option<Value> {
        if let Some(scope) = self.scope() {
            if let Some(value) = self.cache.get(&CacheKey::new(Some(scope), topic)) {
                return Some(value);
            }
        }
        self.cache.get(&CacheKey::global(topic))
    }

    /// Rebind scope-aware topics to `scope`. Scope-independent topics keep
    /// their connection and their cached values.
    pub fn set_scope(&mut self, scope: Option<String>) -> Result<()> {
        let scope = normalize_scope(scope)?;
        if scope == self.scope {
            return Ok(());
        }
        tracing::info!(
            from = self.scope.as_deref().unwrap_or("-"),
            to = scope.as_deref().unwrap_or("-"),
            "Feed hub scope changed"
        );
        if let Some(scoped) = &self.scoped {
            scoped.set_scope(scope.clone());
        }
        self.scope = scope;
        Ok(())
    }

    /// Force a fresh stream attempt on both subscriptions.
    pub fn reconnect(&self) {
        for sub in self.global.iter().chain(self.scoped.iter()) {
            sub.reconnect();
        }
    }

    /// Tear both subscriptions down. Idempotent.
    pub async fn dispose(&mut self) {
        if let Some(sub) = &mut self.scoped {
            sub.dispose().await;
        }
        if let Some(sub) = &mut self.global {
            sub.dispose().await;
        }
    }
}
