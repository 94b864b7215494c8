//! Scripted in-memory transport and poll source shared by the integration
//! tests. Every test runs on tokio's paused clock, so backoff and polling
//! intervals elapse instantly while keeping their ordering.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, BoxFuture};
use futures_util::stream::{self, BoxStream};
use futures_util::{FutureExt, StreamExt};
use livefeed::feed::polling::PollSource;
use livefeed::stream::{StreamConnector, StreamSignal};
use livefeed::types::{SubscriptionStatus, Topic};
use livefeed::{FeedConfig, FeedError, ResilientSubscription};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use url::Url;

pub const BASE_URL: &str = "https://api.example.com";

/// Upper bound for any wait; far beyond every backoff and poll interval.
const WAIT_LIMIT: Duration = Duration::from_secs(600);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("livefeed=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn config() -> FeedConfig {
    FeedConfig::new(BASE_URL).unwrap()
}

pub fn prices() -> Topic {
    Topic::snapshot("prices").poll_path("/prices")
}

pub fn event(name: &str, data: &str) -> StreamSignal {
    StreamSignal::Event {
        name: name.into(),
        data: data.into(),
    }
}

pub fn failed() -> StreamSignal {
    StreamSignal::Failed("connection refused".into())
}

// ---------------------------------------------------------------------------
// FakeConnector
// ---------------------------------------------------------------------------

type Script = Box<dyn FnMut(usize, &Url) -> Vec<StreamSignal> + Send>;

struct Opened {
    url: Url,
    tx: mpsc::UnboundedSender<StreamSignal>,
}

/// Transport whose every open replays a scripted list of signals, then stays
/// silent until the test pushes more.
pub struct FakeConnector {
    script: Mutex<Script>,
    opens: Mutex<Vec<Opened>>,
}

impl FakeConnector {
    pub fn new(script: impl FnMut(usize, &Url) -> Vec<StreamSignal> + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Box::new(script)),
            opens: Mutex::new(Vec::new()),
        })
    }

    /// Every open succeeds and stays open.
    pub fn opening() -> Arc<Self> {
        Self::new(|_, _| vec![StreamSignal::Opened])
    }

    /// Every open fails immediately.
    pub fn failing() -> Arc<Self> {
        Self::new(|_, _| vec![failed()])
    }

    pub fn opens(&self) -> usize {
        self.opens.lock().len()
    }

    pub fn urls(&self) -> Vec<Url> {
        self.opens.lock().iter().map(|o| o.url.clone()).collect()
    }

    /// Deliver `signal` on the `index`-th opened transport.
    pub fn push(&self, index: usize, signal: StreamSignal) {
        let _ = self.opens.lock()[index].tx.send(signal);
    }

    /// Whether the subscription dropped the `index`-th transport.
    pub fn is_closed(&self, index: usize) -> bool {
        self.opens.lock()[index].tx.is_closed()
    }
}

impl StreamConnector for FakeConnector {
    fn open(&self, url: &Url) -> BoxStream<'static, StreamSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        let index = self.opens.lock().len();
        let signals = {
            let mut script = self.script.lock();
            (*script)(index, url)
        };
        for signal in signals {
            let _ = tx.send(signal);
        }
        self.opens.lock().push(Opened {
            url: url.clone(),
            tx,
        });
        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|s| (s, rx)) }).boxed()
    }
}

// ---------------------------------------------------------------------------
// FakePoller
// ---------------------------------------------------------------------------

/// Poll source answering every fetch with the configured payload, or with a
/// 503 when none is set.
pub struct FakePoller {
    calls: Mutex<Vec<Url>>,
    response: Mutex<Option<Value>>,
}

impl FakePoller {
    pub fn ok(payload: Value) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            response: Mutex::new(Some(payload)),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            response: Mutex::new(None),
        })
    }

    pub fn respond(&self, payload: Value) {
        *self.response.lock() = Some(payload);
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn urls(&self) -> Vec<Url> {
        self.calls.lock().clone()
    }
}

impl PollSource for FakePoller {
    fn fetch(&self, url: Url) -> BoxFuture<'static, livefeed::Result<Value>> {
        self.calls.lock().push(url);
        let result = match self.response.lock().clone() {
            Some(payload) => Ok(payload),
            None => Err(FeedError::HttpStatus {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "down".into(),
            }),
        };
        future::ready(result).boxed()
    }
}

// ---------------------------------------------------------------------------
// Waiting
// ---------------------------------------------------------------------------

/// Wait until the subscription publishes a status matching `predicate`.
pub async fn wait_until(
    sub: &ResilientSubscription,
    predicate: impl FnMut(&SubscriptionStatus) -> bool,
) -> SubscriptionStatus {
    wait_on(sub.watch(), predicate).await
}

pub async fn wait_on(
    mut rx: watch::Receiver<SubscriptionStatus>,
    predicate: impl FnMut(&SubscriptionStatus) -> bool,
) -> SubscriptionStatus {
    let status = tokio::time::timeout(WAIT_LIMIT, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for status")
        .expect("subscription task stopped")
        .clone();
    status
}

/// Let the subscription tasks drain everything that is ready without moving
/// the clock meaningfully.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
