//! Exponential reconnection backoff.
//!
//! [`BackoffPolicy`] is a pure function from an attempt number to a delay.
//! [`BackoffState`] is the caller-owned counter that a subscription advances
//! on every failed open and resets on every successful one.

use std::time::Duration;

use crate::config::BackoffConfig;

/// Stateless exponential backoff: `delay(n) = min(base * 2^n, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        Self::new(config.base_delay, config.max_delay)
    }
}

impl BackoffPolicy {
    /// Create a policy with the given base and cap.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay to wait before retry number `attempt` (0-based).
    ///
    /// Saturates at the cap for any attempt, including ones large enough to
    /// overflow the multiplication.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Consecutive-failure counter for one subscription.
#[derive(Debug, Clone)]
pub struct BackoffState {
    policy: BackoffPolicy,
    max_attempts: u32,
    attempt: u32,
}

impl BackoffState {
    /// A fresh counter for the given configuration.
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            policy: BackoffPolicy::from(config),
            max_attempts: config.max_attempts.max(1),
            attempt: 0,
        }
    }

    /// Consecutive failures since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The failure threshold.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether the threshold has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Record one failed open.
    ///
    /// Returns the delay before the next retry, or `None` once the threshold
    /// is reached and the caller must stop retrying the stream. The counter
    /// does not move past the threshold.
    pub fn fail(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.policy.delay(self.attempt);
        self.attempt += 1;
        (!self.is_exhausted()).then_some(delay)
    }

    /// Reset after a successful open or an explicit reconnect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
