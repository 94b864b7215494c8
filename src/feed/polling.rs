//! Polling fallback.
//!
//! Once a subscription's consecutive stream failures reach the threshold it
//! stops opening the stream and instead fetches each topic's REST
//! [`PollTarget`] immediately, then on every polling interval. Fetch failures
//! are swallowed and retried on the next tick. Results are written through
//! the same cache contract as pushed events, so readers cannot tell the two
//! sources apart.

use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use serde_json::Value;
use url::Url;

use crate::error::Result;

/// Performs one REST fetch. Implemented by [`FeedClient`](crate::client::FeedClient)
/// and test fakes.
pub trait PollSource: Send + Sync + 'static {
    /// `GET url` and decode the JSON body.
    fn fetch(&self, url: Url) -> BoxFuture<'static, Result<Value>>;
}

/// One REST resource polled for one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    /// Topic the fetched payload is written to.
    pub topic: String,
    /// Absolute URL to fetch.
    pub url: Url,
}

/// Outcome of one fetch in a poll round.
pub(crate) type PollOutcome = (String, Result<Value>);

/// Fetch every target concurrently.
pub(crate) async fn poll_round(
    source: Arc<dyn PollSource>,
    targets: Vec<PollTarget>,
) -> Vec<PollOutcome> {
    let fetches = targets.into_iter().map(|PollTarget { topic, url }| {
        let fetch = source.fetch(url);
        async move { (topic, fetch.await) }
    });
    future::join_all(fetches).await
}
