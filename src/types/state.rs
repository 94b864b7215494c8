//! Connection state and subscription status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Connection State
// ---------------------------------------------------------------------------

/// Lifecycle state of one subscription.
///
/// `Disabled` is terminal until reconfigured (no endpoint configured). All
/// other states are transient and re-enterable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// A stream open is in progress.
    Connecting,
    /// The stream is open and delivering events.
    Connected,
    /// Suspended (hidden), idle, or disposed. No transport and no timers.
    Disconnected,
    /// The last stream attempt failed.
    Error,
    /// No endpoint is configured; nothing will ever be attempted.
    Disabled,
    /// Stream retries are exhausted; data arrives by periodic REST fetch.
    Polling,
}

impl ConnectionState {
    /// Wire/display name of the state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::Disabled => "disabled",
            Self::Polling => "polling",
        }
    }

    /// Whether fresh data is currently flowing (stream or polling).
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connected | Self::Polling)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Subscription Status
// ---------------------------------------------------------------------------

/// Observable status of a subscription, published on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionStatus {
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Consecutive failed opens since the last successful one.
    pub attempt: u32,
    /// Whether a reconnection timer is armed.
    pub retry_pending: bool,
    /// Scope the subscription is currently bound to.
    pub scope: Option<String>,
    /// When an envelope (stream or poll) last changed the cache. Duplicate
    /// deliveries leave it untouched.
    pub last_event_at: Option<DateTime<Utc>>,
}

impl SubscriptionStatus {
    pub(crate) fn new(state: ConnectionState, scope: Option<String>) -> Self {
        Self {
            state,
            attempt: 0,
            retry_pending: false,
            scope,
            last_event_at: None,
        }
    }
}
