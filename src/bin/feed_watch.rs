//! Binary that connects a feed hub to a backend and prints every cache
//! update and notification, for inspecting a live deployment.
//!
//! # Usage
//!
//! ```sh
//! export LIVEFEED_BASE_URL="https://api.example.com"
//! # name = snapshot, name:N = event stream of N items, @name = scope-aware
//! export LIVEFEED_TOPICS="prices,feed:20,@positions"
//! export LIVEFEED_ADDRESS="0xAbC"          # optional scope
//! export LIVEFEED_TRANSPORT="ws"           # optional, default sse
//! cargo run --bin feed_watch --features cli
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use livefeed::stream::StreamConnector;
use livefeed::stream::sse::SseConnector;
use livefeed::stream::ws::WsConnector;
use livefeed::types::Topic;
use livefeed::{FeedConfig, FeedError, FeedHub};
use tokio::sync::broadcast::error::RecvError;
use tokio::time;

const DEFAULT_TOPICS: &str = "prices";
const DEFAULT_WATCH_SECS: u64 = 30;

fn parse_topic(raw: &str) -> livefeed::Result<Topic> {
    let (scoped, raw) = match raw.strip_prefix('@') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let topic = match raw.split_once(':') {
        Some((name, len)) => {
            let max_len = len
                .parse()
                .map_err(|_| FeedError::InvalidArgument(format!("bad bound in topic {raw:?}")))?;
            Topic::event_stream(name, max_len).notify(format!("{name}:new-item"))
        }
        None => Topic::snapshot(raw),
    };
    let path = format!("/{}", topic.name);
    let topic = topic.poll_path(path);
    Ok(if scoped { topic.scoped() } else { topic })
}

#[tokio::main]
async fn main() -> livefeed::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = FeedConfig::from_env()?;
    config.require_base_url()?;

    let topics = env::var("LIVEFEED_TOPICS").unwrap_or_else(|_| DEFAULT_TOPICS.into());
    let topics = topics
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(parse_topic)
        .collect::<livefeed::Result<Vec<_>>>()?;

    let connector: Arc<dyn StreamConnector> = match env::var("LIVEFEED_TRANSPORT").as_deref() {
        Ok("ws") => Arc::new(WsConnector::new()),
        _ => Arc::new(SseConnector::default()),
    };
    let secs = env::var("LIVEFEED_WATCH_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_WATCH_SECS);

    let mut builder = FeedHub::builder(config).topics(topics).connector(connector);
    if let Ok(address) = env::var("LIVEFEED_ADDRESS") {
        builder = builder.scope(address);
    }
    let mut hub = builder.build()?;

    let mut updates = hub.cache().subscribe();
    let mut notifications = hub.bus().subscribe();

    println!("Watching for {secs} seconds…\n");
    let deadline = time::sleep(Duration::from_secs(secs));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                println!("\n{secs} seconds elapsed, disconnecting…");
                break;
            }
            update = updates.recv() => match update {
                Ok(update) => {
                    let value = hub.cache().get(&update.key);
                    println!("[{:?}] {} = {}", update.kind, update.key, value.unwrap_or_default());
                }
                Err(RecvError::Lagged(n)) => eprintln!("Skipped {n} cache updates"),
                Err(RecvError::Closed) => break,
            },
            notification = notifications.recv() => match notification {
                Ok(n) => println!("notify {} ({}): {}", n.tag, n.topic, n.current),
                Err(RecvError::Lagged(n)) => eprintln!("Skipped {n} notifications"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    if let Some(status) = hub.global_status() {
        println!("global: {} (attempt {})", status.state, status.attempt);
    }
    if let Some(status) = hub.scoped_status() {
        println!("scoped: {} (attempt {})", status.state, status.attempt);
    }
    hub.dispose().await;
    println!("Done.");

    Ok(())
}
