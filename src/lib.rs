//! # livefeed
//!
//! Resilient real-time subscriptions for read-mostly dashboards: keep a local
//! cache in sync with a backend that pushes named events over Server-Sent
//! Events (or WebSocket), and degrade gracefully when the push channel fails.
//!
//! - exponential backoff reconnection, capped, with a bounded attempt count
//! - automatic fallback to REST polling once the stream keeps failing
//! - one connection multiplexing many topics
//! - full suspension while the consuming view is hidden
//! - scope (e.g. wallet address) switching that clears the previous scope
//!
//! ## Quick Start
//!
//! ```no_run
//! use livefeed::{FeedConfig, FeedHub};
//! use livefeed::types::Topic;
//!
//! #[tokio::main]
//! async fn main() -> livefeed::Result<()> {
//!     let config = FeedConfig::from_env()?;
//!     let mut hub = FeedHub::new(
//!         config,
//!         [
//!             Topic::snapshot("prices").poll_path("/prices"),
//!             Topic::event_stream("feed", 20).notify("feed:new-item"),
//!         ],
//!     )?;
//!     // Read hub.get("prices"), watch hub.cache().subscribe(), ...
//!     hub.dispose().await;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod bus;
pub mod cache;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod feed;
pub mod stream;
pub mod topics;
pub mod types;
pub mod visibility;

/// Re-export the main entry points at crate root for convenience.
pub use cache::MemoryCache;
pub use client::FeedClient;
pub use config::FeedConfig;
pub use feed::hub::FeedHub;
pub use feed::subscription::ResilientSubscription;
/// Re-export the error type and Result alias.
pub use error::{FeedError, Result};
