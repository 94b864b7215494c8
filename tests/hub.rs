//! `FeedHub`: one scope-independent and one scope-aware multiplexed
//! connection over a shared cache.

mod common;

use std::time::Duration;

use common::*;
use livefeed::cache::CacheKey;
use livefeed::stream::StreamSignal;
use livefeed::types::{ConnectionState, Topic};
use livefeed::{FeedConfig, FeedError, FeedHub};
use serde_json::json;
use tokio::time;
use url::Url;

fn topics() -> Vec<Topic> {
    vec![
        prices(),
        Topic::event_stream("feed", 20).notify("feed:new-item"),
        Topic::snapshot("positions").scoped().poll_path("/positions"),
    ]
}

/// Scoped connections echo their address as the positions payload; the
/// global one pushes a price and a feed item.
fn script(_: usize, url: &Url) -> Vec<StreamSignal> {
    let address = url
        .query_pairs()
        .find(|(k, _)| k == "address")
        .map(|(_, v)| v.into_owned());
    match address {
        Some(address) => vec![
            StreamSignal::Opened,
            event("positions", &format!("\"{address}\"")),
        ],
        None => vec![
            StreamSignal::Opened,
            event("prices", "100"),
            event("feed", r#"{"id":1}"#),
        ],
    }
}

#[test]
fn hub_requires_base_url() {
    let err = FeedHub::new(FeedConfig::default(), topics()).unwrap_err();
    assert!(matches!(err, FeedError::Config(_)));
}

#[tokio::test(start_paused = true)]
async fn scope_changes_only_touch_scoped_connection() {
    init_tracing();
    let connector = FakeConnector::new(script);
    let mut hub = FeedHub::builder(config())
        .topics(topics())
        .connector(connector.clone())
        .poller(FakePoller::failing())
        .build()
        .unwrap();

    // No scope: only the global connection exists.
    settle().await;
    assert_eq!(connector.opens(), 1);
    assert_eq!(
        connector.urls()[0].as_str(),
        "https://api.example.com/sse/stream?topics=feed,prices"
    );
    assert_eq!(
        hub.global_status().map(|s| s.state),
        Some(ConnectionState::Connected)
    );
    assert_eq!(
        hub.scoped_status().map(|s| s.state),
        Some(ConnectionState::Disconnected)
    );
    assert_eq!(hub.get("prices"), Some(json!(100)));
    assert_eq!(hub.get("positions"), None);

    hub.set_scope(Some("0xA".into())).unwrap();
    settle().await;
    assert_eq!(connector.opens(), 2);
    assert_eq!(
        connector.urls()[1].as_str(),
        "https://api.example.com/sse/stream?topics=positions&address=0xA"
    );
    assert_eq!(hub.get("positions"), Some(json!("0xA")));

    hub.set_scope(Some("0xB".into())).unwrap();
    settle().await;
    assert_eq!(connector.opens(), 3);
    assert!(connector.is_closed(1));
    assert!(!connector.is_closed(0));
    assert_eq!(hub.cache().get(&CacheKey::new(Some("0xA"), "positions")), None);
    assert_eq!(hub.get("positions"), Some(json!("0xB")));

    // Dropping the scope clears scoped entries; globals keep streaming.
    hub.set_scope(None).unwrap();
    settle().await;
    assert_eq!(connector.opens(), 3);
    assert!(connector.is_closed(2));
    assert!(!connector.is_closed(0));
    assert_eq!(hub.cache().get(&CacheKey::new(Some("0xB"), "positions")), None);
    assert_eq!(hub.get("positions"), None);
    assert_eq!(hub.get("prices"), Some(json!(100)));
    assert_eq!(hub.get("feed"), Some(json!([{"id": 1}])));

    hub.dispose().await;
    assert!(connector.is_closed(0));
}

#[tokio::test(start_paused = true)]
async fn initial_scope_and_notifications() {
    let connector = FakeConnector::new(script);
    let hub = FeedHub::builder(config())
        .topics(topics())
        .scope("0xC")
        .connector(connector.clone())
        .poller(FakePoller::failing())
        .build()
        .unwrap();
    let mut notifications = hub.bus().subscribe();
    let mut updates = hub.cache().subscribe();

    // Both connections are opened synchronously by `build`.
    assert_eq!(connector.opens(), 2);
    settle().await;

    assert_eq!(hub.scope(), Some("0xC"));
    assert_eq!(hub.get("positions"), Some(json!("0xC")));

    let n = notifications.try_recv().unwrap();
    assert_eq!(n.tag, "feed:new-item");
    assert_eq!(n.current, json!({"id": 1}));
    assert!(n.scope.is_none());

    let mut keys = Vec::new();
    while let Ok(update) = updates.try_recv() {
        keys.push(update.key);
    }
    assert_eq!(keys.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn hidden_suspends_both_connections() {
    let connector = FakeConnector::new(script);
    let mut hub = FeedHub::builder(config())
        .topics(topics())
        .scope("0xA")
        .connector(connector.clone())
        .poller(FakePoller::failing())
        .build()
        .unwrap();

    settle().await;
    assert!(hub.visibility().hide());
    wait_on(hub.global().unwrap().watch(), |s| {
        s.state == ConnectionState::Disconnected
    })
    .await;
    wait_on(hub.scoped().unwrap().watch(), |s| {
        s.state == ConnectionState::Disconnected
    })
    .await;
    assert!(connector.is_closed(0));
    assert!(connector.is_closed(1));

    // Cached data survives suspension.
    assert_eq!(hub.get("prices"), Some(json!(100)));

    time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.opens(), 2);

    hub.visibility().show();
    wait_on(hub.global().unwrap().watch(), |s| {
        s.state == ConnectionState::Connected
    })
    .await;
    wait_on(hub.scoped().unwrap().watch(), |s| {
        s.state == ConnectionState::Connected
    })
    .await;
    assert_eq!(connector.opens(), 4);

    hub.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn invalid_scope_is_rejected() {
    let mut hub = FeedHub::builder(config())
        .topics(topics())
        .connector(FakeConnector::opening())
        .poller(FakePoller::failing())
        .build()
        .unwrap();

    let err = hub.set_scope(Some("0xA/../admin".into())).unwrap_err();
    assert!(matches!(err, FeedError::InvalidArgument(_)));
    assert_eq!(hub.scope(), None);

    // Blank scopes mean "no scope".
    hub.set_scope(Some("  ".into())).unwrap();
    assert_eq!(hub.scope(), None);
}
