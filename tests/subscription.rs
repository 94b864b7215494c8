//! End-to-end behaviour of a single `ResilientSubscription` against the
//! scripted transport in `common`.
//!
//! # What is tested
//!
//! - **Disabled**: no base URL means no task, no timers, no network
//! - **Snapshot / event-stream writes**: replace and bounded prepend
//! - **Backoff**: 1 s / 2 s retries, attempt reset only on a real open
//! - **Polling fallback**: after three failures, immediate then every 30 s
//! - **Give-up variant**: five attempts, then a frozen `Error`
//! - **Visibility**: hidden tears everything down, visible retries the stream
//! - **Scope change**: old scope cleared before the new stream opens
//! - **Idle watchdog, malformed payloads, notifications, dispose**

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use livefeed::ResilientSubscription;
use livefeed::bus::EventBus;
use livefeed::cache::{CacheKey, MemoryCache};
use livefeed::config::{BackoffConfig, FeedConfig};
use livefeed::stream::StreamSignal;
use livefeed::topics::TopicMultiplexer;
use livefeed::types::{ConnectionState, Topic};
use livefeed::visibility::{Visibility, VisibilityController};
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::{self, Instant};

fn dedicated(topic: Topic) -> TopicMultiplexer {
    TopicMultiplexer::dedicated(topic, None).unwrap()
}

// ---------------------------------------------------------------------------
// Disabled
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn without_base_url_nothing_runs() {
    init_tracing();
    let connector = FakeConnector::opening();
    let poller = FakePoller::ok(json!({}));
    let cache = Arc::new(MemoryCache::new());

    let sub = ResilientSubscription::builder(
        FeedConfig::default(),
        dedicated(prices()),
        cache.clone(),
    )
    .connector(connector.clone())
    .poller(poller.clone())
    .spawn()
    .unwrap();

    assert_eq!(sub.state(), ConnectionState::Disabled);
    assert!(!sub.is_running());

    time::sleep(Duration::from_secs(300)).await;
    assert_eq!(connector.opens(), 0);
    assert_eq!(poller.calls(), 0);
    assert!(cache.is_empty());
    assert_eq!(sub.state(), ConnectionState::Disabled);
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn snapshot_event_replaces_cached_value() {
    init_tracing();
    let connector = FakeConnector::new(|_, _| {
        vec![StreamSignal::Opened, event("message", r#"{"BTC":100}"#)]
    });
    let cache = Arc::new(MemoryCache::new());
    let sub = ResilientSubscription::builder(config(), dedicated(prices()), cache.clone())
        .connector(connector.clone())
        .poller(FakePoller::failing())
        .spawn()
        .unwrap();

    assert_eq!(
        connector.urls()[0].as_str(),
        "https://api.example.com/sse/prices"
    );
    let status = wait_until(&sub, |s| s.last_event_at.is_some()).await;
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(cache.get(&CacheKey::global("prices")), Some(json!({"BTC": 100})));

    connector.push(0, event("message", r#"{"BTC":101}"#));
    settle().await;
    assert_eq!(cache.get(&CacheKey::global("prices")), Some(json!({"BTC": 101})));
    assert_eq!(cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn duplicate_delivery_keeps_last_event_time() {
    let connector = FakeConnector::new(|_, _| vec![StreamSignal::Opened, event("message", "100")]);
    let sub = ResilientSubscription::builder(
        config(),
        dedicated(prices()),
        Arc::new(MemoryCache::new()),
    )
    .connector(connector.clone())
    .poller(FakePoller::failing())
    .spawn()
    .unwrap();

    let first = wait_until(&sub, |s| s.last_event_at.is_some())
        .await
        .last_event_at;

    connector.push(0, event("message", "100"));
    settle().await;
    assert_eq!(sub.status().last_event_at, first);

    // Timestamps come from the wall clock, which the paused runtime leaves alone.
    std::thread::sleep(Duration::from_millis(2));
    connector.push(0, event("message", "101"));
    settle().await;
    assert!(sub.status().last_event_at > first);
}

#[tokio::test(start_paused = true)]
async fn unchanged_poll_keeps_last_event_time() {
    let poller = FakePoller::ok(json!({"BTC": 99}));
    let sub = ResilientSubscription::builder(
        config(),
        dedicated(prices()),
        Arc::new(MemoryCache::new()),
    )
    .connector(FakeConnector::failing())
    .poller(poller.clone())
    .spawn()
    .unwrap();

    wait_until(&sub, |s| s.state == ConnectionState::Polling).await;
    settle().await;
    assert_eq!(poller.calls(), 1);
    let first = sub.status().last_event_at;
    assert!(first.is_some());

    time::sleep(Duration::from_secs(30)).await;
    assert_eq!(poller.calls(), 2);
    assert_eq!(sub.status().last_event_at, first);

    std::thread::sleep(Duration::from_millis(2));
    poller.respond(json!({"BTC": 100}));
    time::sleep(Duration::from_secs(30)).await;
    assert_eq!(poller.calls(), 3);
    assert!(sub.status().last_event_at > first);
}

#[tokio::test(start_paused = true)]
async fn event_stream_keeps_newest_ten() {
    let connector = FakeConnector::new(|_, _| {
        let mut signals = vec![StreamSignal::Opened];
        signals.extend((1..=12).map(|i| event("message", &format!("\"item{i}\""))));
        signals
    });
    let cache = Arc::new(MemoryCache::new());
    let _sub = ResilientSubscription::builder(
        config(),
        dedicated(Topic::event_stream("trades", 10)),
        cache.clone(),
    )
    .connector(connector.clone())
    .poller(FakePoller::failing())
    .spawn()
    .unwrap();

    settle().await;
    let expected: Vec<_> = (3..=12).rev().map(|i| json!(format!("item{i}"))).collect();
    assert_eq!(cache.get(&CacheKey::global("trades")), Some(json!(expected)));
}

#[tokio::test(start_paused = true)]
async fn malformed_payload_is_dropped_and_connection_survives() {
    let connector = FakeConnector::new(|_, _| {
        vec![
            StreamSignal::Opened,
            event("message", "{not json"),
            event("message", r#"{"ok":true}"#),
        ]
    });
    let cache = Arc::new(MemoryCache::new());
    let sub = ResilientSubscription::builder(config(), dedicated(prices()), cache.clone())
        .connector(connector.clone())
        .poller(FakePoller::failing())
        .spawn()
        .unwrap();

    settle().await;
    assert_eq!(sub.state(), ConnectionState::Connected);
    assert_eq!(connector.opens(), 1);
    assert!(!connector.is_closed(0));
    assert_eq!(cache.get(&CacheKey::global("prices")), Some(json!({"ok": true})));
}

#[tokio::test(start_paused = true)]
async fn notifications_fire_once_per_observable_write() {
    let connector = FakeConnector::new(|_, _| {
        vec![
            StreamSignal::Opened,
            event("message", r#"{"id":1}"#),
            event("message", r#"{"id":1}"#),
            event("heartbeat", ""),
            event("message", r#"{"id":2}"#),
        ]
    });
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let cache = Arc::new(MemoryCache::new());
    let _sub = ResilientSubscription::builder(
        config(),
        dedicated(Topic::event_stream("feed", 20).notify("feed:new-item")),
        cache.clone(),
    )
    .connector(connector)
    .poller(FakePoller::failing())
    .bus(bus.clone())
    .spawn()
    .unwrap();

    settle().await;
    let first = rx.try_recv().unwrap();
    assert_eq!(first.tag, "feed:new-item");
    assert_eq!(first.topic, "feed");
    assert_eq!(first.current, json!({"id": 1}));
    let second = rx.try_recv().unwrap();
    assert_eq!(second.current, json!({"id": 2}));
    assert!(rx.try_recv().is_err());

    assert_eq!(
        cache.get(&CacheKey::global("feed")),
        Some(json!([{"id": 2}, {"id": 1}]))
    );
}

// ---------------------------------------------------------------------------
// Backoff and polling
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn three_failures_fall_back_to_polling() {
    init_tracing();
    let start = Instant::now();
    let connector = FakeConnector::failing();
    let poller = FakePoller::ok(json!({"BTC": 99}));
    let cache = Arc::new(MemoryCache::new());
    let sub = ResilientSubscription::builder(config(), dedicated(prices()), cache.clone())
        .connector(connector.clone())
        .poller(poller.clone())
        .spawn()
        .unwrap();

    let first = wait_until(&sub, |s| s.state == ConnectionState::Error).await;
    assert_eq!(first.attempt, 1);
    assert!(first.retry_pending);

    let status = wait_until(&sub, |s| s.state == ConnectionState::Polling).await;
    assert_eq!(status.attempt, 3);
    assert!(!status.retry_pending);
    assert_eq!(connector.opens(), 3);
    // Retries waited 1 s then 2 s.
    assert_eq!(start.elapsed().as_secs(), 3);

    // Immediate fetch on entering polling.
    settle().await;
    assert_eq!(poller.calls(), 1);
    assert_eq!(poller.urls()[0].as_str(), "https://api.example.com/prices");
    assert_eq!(cache.get(&CacheKey::global("prices")), Some(json!({"BTC": 99})));

    // Then one every 30 s, and no more stream attempts.
    time::sleep(Duration::from_secs(95)).await;
    assert_eq!(poller.calls(), 4);
    assert_eq!(connector.opens(), 3);
    assert_eq!(sub.state(), ConnectionState::Polling);
}

#[tokio::test(start_paused = true)]
async fn poll_failures_are_swallowed() {
    let connector = FakeConnector::failing();
    let poller = FakePoller::failing();
    let cache = Arc::new(MemoryCache::new());
    let sub = ResilientSubscription::builder(config(), dedicated(prices()), cache.clone())
        .connector(connector)
        .poller(poller.clone())
        .spawn()
        .unwrap();

    wait_until(&sub, |s| s.state == ConnectionState::Polling).await;
    settle().await;
    assert_eq!(poller.calls(), 1);
    assert!(cache.is_empty());

    poller.respond(json!({"BTC": 1}));
    time::sleep(Duration::from_secs(30)).await;
    assert_eq!(poller.calls(), 2);
    assert_eq!(cache.get(&CacheKey::global("prices")), Some(json!({"BTC": 1})));
    assert_eq!(sub.state(), ConnectionState::Polling);
}

#[tokio::test(start_paused = true)]
async fn attempt_resets_only_on_successful_open() {
    // The third transport hangs until the test opens it.
    let connector = FakeConnector::new(|i, _| match i {
        0 | 1 => vec![failed()],
        _ => vec![],
    });
    let cache = Arc::new(MemoryCache::new());
    let sub = ResilientSubscription::builder(config(), dedicated(prices()), cache)
        .connector(connector.clone())
        .poller(FakePoller::failing())
        .spawn()
        .unwrap();

    // Starting a new attempt does not reset the counter.
    wait_until(&sub, |s| {
        s.state == ConnectionState::Connecting && s.attempt == 2
    })
    .await;
    assert_eq!(connector.opens(), 3);

    connector.push(2, StreamSignal::Opened);
    let connected = wait_until(&sub, |s| s.state == ConnectionState::Connected).await;
    assert_eq!(connected.attempt, 0);
    assert_eq!(connector.opens(), 3);

    // A failure after a good open starts over at the 1 s delay.
    connector.push(2, failed());
    let status = wait_until(&sub, |s| s.state == ConnectionState::Error).await;
    assert_eq!(status.attempt, 1);
    assert!(connector.is_closed(2));

    time::sleep(Duration::from_millis(999)).await;
    assert_eq!(connector.opens(), 3);
    time::sleep(Duration::from_millis(2)).await;
    assert_eq!(connector.opens(), 4);
}

#[tokio::test(start_paused = true)]
async fn give_up_variant_freezes_after_five_attempts() {
    let connector = FakeConnector::failing();
    let poller = FakePoller::ok(json!({}));
    let config = FeedConfig::builder()
        .base_url(BASE_URL)
        .backoff(BackoffConfig::give_up())
        .build()
        .unwrap();
    let sub = ResilientSubscription::builder(
        config,
        dedicated(prices()),
        Arc::new(MemoryCache::new()),
    )
    .connector(connector.clone())
    .poller(poller.clone())
    .spawn()
    .unwrap();

    let status = wait_until(&sub, |s| s.attempt == 5).await;
    assert_eq!(status.state, ConnectionState::Error);
    assert!(!status.retry_pending);

    time::sleep(Duration::from_secs(600)).await;
    assert_eq!(connector.opens(), 5);
    assert_eq!(poller.calls(), 0);
    let status = sub.status();
    assert_eq!(status.state, ConnectionState::Error);
    assert_eq!(status.attempt, 5);
}

#[tokio::test(start_paused = true)]
async fn reconnect_leaves_polling_for_the_stream() {
    let connector = FakeConnector::new(|i, _| match i {
        0..=2 => vec![failed()],
        _ => vec![StreamSignal::Opened],
    });
    let poller = FakePoller::ok(json!({}));
    let sub = ResilientSubscription::builder(
        config(),
        dedicated(prices()),
        Arc::new(MemoryCache::new()),
    )
    .connector(connector.clone())
    .poller(poller.clone())
    .spawn()
    .unwrap();

    wait_until(&sub, |s| s.state == ConnectionState::Polling).await;
    settle().await;
    assert_eq!(poller.calls(), 1);

    sub.reconnect();
    let status = wait_until(&sub, |s| s.state == ConnectionState::Connected).await;
    assert_eq!(status.attempt, 0);
    assert_eq!(connector.opens(), 4);

    time::sleep(Duration::from_secs(120)).await;
    assert_eq!(poller.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_stream_is_treated_as_failed() {
    let start = Instant::now();
    let connector = FakeConnector::opening();
    let config = FeedConfig::builder()
        .base_url(BASE_URL)
        .idle_timeout(Duration::from_secs(10))
        .build()
        .unwrap();
    let sub = ResilientSubscription::builder(
        config,
        dedicated(prices()),
        Arc::new(MemoryCache::new()),
    )
    .connector(connector.clone())
    .poller(FakePoller::failing())
    .spawn()
    .unwrap();

    wait_until(&sub, |s| s.state == ConnectionState::Connected).await;
    let status = wait_until(&sub, |s| s.state == ConnectionState::Error).await;
    assert_eq!(status.attempt, 1);
    assert_eq!(start.elapsed().as_secs(), 10);
    assert!(connector.is_closed(0));

    time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(connector.opens(), 2);
}

// ---------------------------------------------------------------------------
// Visibility
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn hidden_closes_live_connection() {
    let connector = FakeConnector::opening();
    let visibility = VisibilityController::default();
    let sub = ResilientSubscription::builder(
        config(),
        dedicated(prices()),
        Arc::new(MemoryCache::new()),
    )
    .connector(connector.clone())
    .poller(FakePoller::failing())
    .visibility(visibility.subscribe())
    .spawn()
    .unwrap();

    wait_until(&sub, |s| s.state == ConnectionState::Connected).await;
    assert!(visibility.hide());
    wait_until(&sub, |s| s.state == ConnectionState::Disconnected).await;
    assert!(connector.is_closed(0));

    time::sleep(Duration::from_secs(300)).await;
    assert_eq!(connector.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn hidden_cancels_pending_retry() {
    let connector = FakeConnector::failing();
    let poller = FakePoller::ok(json!({}));
    let visibility = VisibilityController::default();
    let sub = ResilientSubscription::builder(
        config(),
        dedicated(prices()),
        Arc::new(MemoryCache::new()),
    )
    .connector(connector.clone())
    .poller(poller.clone())
    .visibility(visibility.subscribe())
    .spawn()
    .unwrap();

    let status = wait_until(&sub, |s| s.state == ConnectionState::Error).await;
    assert!(status.retry_pending);

    visibility.hide();
    let status = wait_until(&sub, |s| s.state == ConnectionState::Disconnected).await;
    assert!(!status.retry_pending);

    time::sleep(Duration::from_secs(300)).await;
    assert_eq!(connector.opens(), 1);
    assert_eq!(poller.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn hidden_stops_polling_and_visible_retries_stream_first() {
    let connector = FakeConnector::failing();
    let poller = FakePoller::ok(json!({}));
    let visibility = VisibilityController::default();
    let sub = ResilientSubscription::builder(
        config(),
        dedicated(prices()),
        Arc::new(MemoryCache::new()),
    )
    .connector(connector.clone())
    .poller(poller.clone())
    .visibility(visibility.subscribe())
    .spawn()
    .unwrap();

    wait_until(&sub, |s| s.state == ConnectionState::Polling).await;
    settle().await;
    assert_eq!(poller.calls(), 1);

    visibility.hide();
    wait_until(&sub, |s| s.state == ConnectionState::Disconnected).await;
    time::sleep(Duration::from_secs(300)).await;
    assert_eq!(poller.calls(), 1);
    assert_eq!(connector.opens(), 3);

    // Visible again: attempt reset, stream tried before any poll.
    visibility.show();
    let status = wait_until(&sub, |s| {
        s.state == ConnectionState::Error && s.attempt == 1
    })
    .await;
    assert!(status.retry_pending);
    assert_eq!(connector.opens(), 4);
    assert_eq!(poller.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn starting_hidden_waits_for_visible() {
    let connector = FakeConnector::opening();
    let visibility = VisibilityController::new(Visibility::Hidden);
    let sub = ResilientSubscription::builder(
        config(),
        dedicated(prices()),
        Arc::new(MemoryCache::new()),
    )
    .connector(connector.clone())
    .poller(FakePoller::failing())
    .visibility(visibility.subscribe())
    .spawn()
    .unwrap();

    assert_eq!(sub.state(), ConnectionState::Disconnected);
    time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.opens(), 0);

    // Ignored while hidden.
    sub.reconnect();
    settle().await;
    assert_eq!(connector.opens(), 0);

    visibility.show();
    wait_until(&sub, |s| s.state == ConnectionState::Connected).await;
    assert_eq!(connector.opens(), 1);
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn scope_change_clears_old_scope_before_reopening() {
    init_tracing();
    let cache = Arc::new(MemoryCache::new());
    let old_key = CacheKey::new(Some("0xA"), "positions");

    let seen_old_at_open = Arc::new(Mutex::new(Vec::new()));
    let connector = {
        let cache = cache.clone();
        let old_key = old_key.clone();
        let seen = seen_old_at_open.clone();
        FakeConnector::new(move |i, _| {
            seen.lock().push(cache.contains(&old_key));
            match i {
                0 => vec![
                    StreamSignal::Opened,
                    event("positions", "[1,2]"),
                    event("prices", "100"),
                ],
                _ => vec![StreamSignal::Opened, event("positions", "[3]")],
            }
        })
    };

    let topics = TopicMultiplexer::multiplexed(
        [Topic::snapshot("positions").scoped(), Topic::snapshot("prices")],
        Some("0xA".into()),
    )
    .unwrap();
    let sub = ResilientSubscription::builder(config(), topics, cache.clone())
        .connector(connector.clone())
        .poller(FakePoller::failing())
        .spawn()
        .unwrap();

    settle().await;
    assert_eq!(cache.get(&old_key), Some(json!([1, 2])));
    assert_eq!(
        connector.urls()[0].as_str(),
        "https://api.example.com/sse/stream?topics=positions,prices&address=0xA"
    );

    sub.set_scope(Some("0xB".into()));
    let status = wait_until(&sub, |s| s.scope.as_deref() == Some("0xB")).await;
    assert_eq!(status.attempt, 0);
    settle().await;

    assert_eq!(connector.opens(), 2);
    assert!(connector.is_closed(0));
    assert_eq!(*seen_old_at_open.lock(), vec![false, false]);
    assert_eq!(cache.get(&old_key), None);
    assert_eq!(
        cache.get(&CacheKey::new(Some("0xB"), "positions")),
        Some(json!([3]))
    );
    // Scope-independent entries survive.
    assert_eq!(cache.get(&CacheKey::global("prices")), Some(json!(100)));
    assert_eq!(
        connector.urls()[1].as_str(),
        "https://api.example.com/sse/stream?topics=positions,prices&address=0xB"
    );
}

#[tokio::test(start_paused = true)]
async fn dedicated_scoped_topic_without_scope_stays_idle() {
    let connector = FakeConnector::opening();
    let topics =
        TopicMultiplexer::dedicated(Topic::event_stream("trades", 20).scoped(), None).unwrap();
    let sub = ResilientSubscription::builder(config(), topics, Arc::new(MemoryCache::new()))
        .connector(connector.clone())
        .poller(FakePoller::failing())
        .spawn()
        .unwrap();

    assert_eq!(sub.state(), ConnectionState::Disconnected);
    time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.opens(), 0);

    sub.set_scope(Some("0xAbC".into()));
    wait_until(&sub, |s| s.state == ConnectionState::Connected).await;
    assert_eq!(
        connector.urls()[0].as_str(),
        "https://api.example.com/sse/trades/0xAbC"
    );
}

// ---------------------------------------------------------------------------
// Dispose
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn dispose_is_final_and_idempotent() {
    let connector = FakeConnector::opening();
    let mut sub = ResilientSubscription::builder(
        config(),
        dedicated(prices()),
        Arc::new(MemoryCache::new()),
    )
    .connector(connector.clone())
    .poller(FakePoller::failing())
    .spawn()
    .unwrap();

    wait_until(&sub, |s| s.state == ConnectionState::Connected).await;
    sub.dispose().await;
    assert_eq!(sub.state(), ConnectionState::Disconnected);
    assert!(!sub.is_running());
    assert!(connector.is_closed(0));

    sub.dispose().await;
    sub.reconnect();
    time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.opens(), 1);
}
