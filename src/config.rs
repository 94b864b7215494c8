//! Configuration for feeds, backoff, and polling fallback.
//!
//! Configuration is an explicit value handed to every component at
//! construction time. Nothing in the crate reads the process environment on
//! its own; [`FeedConfig::from_env`] exists for binaries that want it.

use std::time::Duration;

use url::Url;

use crate::constants::{BASE_URL_ENV, channels, reconnect};
use crate::error::{FeedError, Result};

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// What a subscription does once its consecutive stream failures reach
/// [`BackoffConfig::max_attempts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExhaustionPolicy {
    /// Stop retrying the stream and poll the REST endpoint instead.
    #[default]
    FallbackToPolling,
    /// Stop retrying and stay in `Error` with a frozen attempt count.
    GiveUp,
}

/// Reconnection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on any retry delay.
    pub max_delay: Duration,
    /// Consecutive failures tolerated before [`Self::exhaustion`] applies.
    pub max_attempts: u32,
    /// Behaviour once retries are exhausted.
    pub exhaustion: ExhaustionPolicy,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: reconnect::BASE_DELAY,
            max_delay: reconnect::MAX_DELAY,
            max_attempts: reconnect::MAX_RECONNECT_ATTEMPTS,
            exhaustion: ExhaustionPolicy::FallbackToPolling,
        }
    }
}

impl BackoffConfig {
    /// The variant that tolerates five failures and then gives up with no
    /// polling fallback.
    pub fn give_up() -> Self {
        Self {
            max_attempts: reconnect::GIVE_UP_ATTEMPTS,
            exhaustion: ExhaustionPolicy::GiveUp,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Polling / stream
// ---------------------------------------------------------------------------

/// Polling fallback parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    /// Interval between fetches. The first fetch is issued immediately.
    pub interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: reconnect::POLL_INTERVAL,
        }
    }
}

/// Push-transport parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamConfig {
    /// Treat a connection that delivers nothing for this long as failed.
    /// `None` relies on the transport's own error signal.
    pub idle_timeout: Option<Duration>,
}

// ---------------------------------------------------------------------------
// FeedConfig
// ---------------------------------------------------------------------------

/// Top-level configuration shared by every subscription of an application.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Backend base URL. `None` puts every subscription into
    /// [`ConnectionState::Disabled`](crate::types::ConnectionState::Disabled).
    pub base_url: Option<Url>,
    /// Reconnection parameters.
    pub backoff: BackoffConfig,
    /// Polling fallback parameters.
    pub polling: PollingConfig,
    /// Push-transport parameters.
    pub stream: StreamConfig,
    /// Capacity of the event bus channel.
    pub notification_capacity: usize,
    /// Capacity of the cache update channel.
    pub cache_update_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            backoff: BackoffConfig::default(),
            polling: PollingConfig::default(),
            stream: StreamConfig::default(),
            notification_capacity: channels::NOTIFICATION_CAPACITY,
            cache_update_capacity: channels::CACHE_UPDATE_CAPACITY,
        }
    }
}

impl FeedConfig {
    /// Configuration pointing at `base_url` with default parameters.
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base_url: Some(parse_base_url(base_url)?),
            ..Self::default()
        })
    }

    /// Read the base URL from `LIVEFEED_BASE_URL`.
    ///
    /// A missing or empty variable yields a config without a base URL (the
    /// disabled posture); a malformed one is an error.
    pub fn from_env() -> Result<Self> {
        match std::env::var(BASE_URL_ENV) {
            Ok(raw) if !raw.trim().is_empty() => Self::new(raw.trim()),
            _ => Ok(Self::default()),
        }
    }

    /// Start a [`FeedConfigBuilder`].
    pub fn builder() -> FeedConfigBuilder {
        FeedConfigBuilder::default()
    }

    /// Whether an endpoint is configured.
    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    /// The base URL, or a configuration error when none is set.
    pub fn require_base_url(&self) -> Result<&Url> {
        self.base_url.as_ref().ok_or_else(|| {
            FeedError::Config(format!(
                "no endpoint base URL configured (set {BASE_URL_ENV} or FeedConfig::base_url)"
            ))
        })
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)?;
    if url.cannot_be_a_base() {
        return Err(FeedError::InvalidArgument(format!(
            "base URL cannot carry path segments: {raw}"
        )));
    }
    Ok(url)
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`FeedConfig`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use livefeed::config::FeedConfig;
///
/// let config = FeedConfig::builder()
///     .base_url("https://api.example.com")
///     .poll_interval(Duration::from_secs(10))
///     .idle_timeout(Duration::from_secs(45))
///     .build()
///     .unwrap();
/// assert!(config.is_enabled());
/// ```
#[derive(Debug, Default)]
pub struct FeedConfigBuilder {
    base_url: Option<String>,
    config: FeedConfig,
}

impl FeedConfigBuilder {
    /// Set the backend base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Replace the backoff parameters. Default: 1 s base, 30 s cap, 3 attempts.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Set the exhaustion policy. Default: fall back to polling.
    pub fn exhaustion(mut self, policy: ExhaustionPolicy) -> Self {
        self.config.backoff.exhaustion = policy;
        self
    }

    /// Set the maximum consecutive stream attempts (at least 1). Default: 3.
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.backoff.max_attempts = n.max(1);
        self
    }

    /// Set the polling interval. Default: 30 s.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.polling.interval = interval;
        self
    }

    /// Enable the idle-timeout watchdog. Default: disabled.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.stream.idle_timeout = Some(timeout);
        self
    }

    /// Set the event bus capacity. Default: 256.
    pub fn notification_capacity(mut self, cap: usize) -> Self {
        self.config.notification_capacity = cap.max(1);
        self
    }

    /// Set the cache update channel capacity. Default: 1,024.
    pub fn cache_update_capacity(mut self, cap: usize) -> Self {
        self.config.cache_update_capacity = cap.max(1);
        self
    }

    /// Build the [`FeedConfig`], validating the base URL if one was given.
    pub fn build(self) -> Result<FeedConfig> {
        let mut config = self.config;
        config.base_url = self.base_url.as_deref().map(parse_base_url).transpose()?;
        Ok(config)
    }
}
