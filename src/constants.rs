//! Constants for the livefeed subscription layer.
//!
//! Contains endpoint path segments, reconnection parameters, and channel
//! capacities. These are the defaults used by
//! [`FeedConfig`](crate::config::FeedConfig), but are also exported for
//! advanced usage.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Environment variable read by [`FeedConfig::from_env`](crate::config::FeedConfig::from_env).
pub const BASE_URL_ENV: &str = "LIVEFEED_BASE_URL";

// ---------------------------------------------------------------------------
// Endpoint shapes
// ---------------------------------------------------------------------------

/// Path segment under which every push endpoint lives (`{base}/sse/...`).
pub const SSE_PATH_SEGMENT: &str = "sse";

/// Path segment of the multiplexed endpoint (`{base}/sse/stream`).
pub const MULTIPLEX_PATH_SEGMENT: &str = "stream";

/// Query parameter carrying the comma-joined topic set.
pub const TOPICS_QUERY_PARAM: &str = "topics";

/// Query parameter carrying the scope (wallet address) on multiplexed and
/// polling requests.
pub const SCOPE_QUERY_PARAM: &str = "address";

/// Event names treated as keepalives and never routed to the cache.
pub const KEEPALIVE_EVENTS: &[&str] = &["ping", "heartbeat"];

// ---------------------------------------------------------------------------
// Reconnection
// ---------------------------------------------------------------------------

/// Reconnection and polling parameters.
pub mod reconnect {
    use super::Duration;

    /// Delay before the first reconnection attempt.
    pub const BASE_DELAY: Duration = Duration::from_millis(1_000);
    /// Upper bound on any reconnection delay.
    pub const MAX_DELAY: Duration = Duration::from_millis(30_000);
    /// Consecutive stream failures before falling back to polling.
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;
    /// Consecutive stream failures tolerated by the give-up variant.
    pub const GIVE_UP_ATTEMPTS: u32 = 5;
    /// Interval between REST fetches while in polling mode.
    pub const POLL_INTERVAL: Duration = Duration::from_secs(30);
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Broadcast channel capacities.
pub mod channels {
    /// Capacity of the [`EventBus`](crate::bus::EventBus) notification channel.
    pub const NOTIFICATION_CAPACITY: usize = 256;
    /// Capacity of the cache update channel.
    pub const CACHE_UPDATE_CAPACITY: usize = 1024;
}
