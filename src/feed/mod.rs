//! Resilient subscriptions.
//!
//! ## [`subscription`]: ResilientSubscription
//!
//! One parameterized state machine: endpoint shape + topics (the event
//! handlers), a cache sink, backoff and polling configuration, a transport
//! connector and a visibility receiver. Each instance runs in its own Tokio
//! task that owns all of its state (transport, retry timer, polling interval,
//! in-flight fetch) and publishes a
//! [`SubscriptionStatus`](crate::types::SubscriptionStatus) on every
//! transition.
//!
//! ## [`hub`]: FeedHub
//!
//! The shared provider: one multiplexed subscription for scope-independent
//! topics and one for scope-aware topics, so a scope change re-subscribes
//! only the latter.
//!
//! ## [`polling`]: Polling fallback
//!
//! REST targets and the fetch seam used once stream retries are exhausted.

pub mod hub;
pub mod polling;
pub mod subscription;
