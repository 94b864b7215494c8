//! Server-Sent Events transport.
//!
//! # Example
//!
//! ```no_run
//! use futures_util::StreamExt;
//! use livefeed::stream::{StreamConnection, StreamSignal, sse::SseConnector};
//!
//! # #[tokio::main]
//! # async fn main() -> livefeed::error::Result<()> {
//! let connector = SseConnector::default();
//! let url = url::Url::parse("https://api.example.com/sse/prices")?;
//! let mut conn = StreamConnection::open(&connector, url);
//!
//! while let Some(signal) = conn.next_signal().await {
//!     match signal {
//!         StreamSignal::Opened => println!("open"),
//!         StreamSignal::Event { name, data } => println!("{name}: {data}"),
//!         StreamSignal::Failed(reason) => eprintln!("failed: {reason}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use reqwest::header::{self, HeaderValue};
use reqwest_eventsource::retry::Never;
use reqwest_eventsource::{Event, EventSource};
use url::Url;

use super::connection::{StreamConnector, StreamSignal};

/// Opens `text/event-stream` connections with a shared [`reqwest::Client`].
///
/// `reqwest-eventsource`'s own reconnection is disabled: a dropped stream is
/// reported as [`StreamSignal::Failed`] and the subscription decides what to
/// do next.
#[derive(Debug, Clone, Default)]
pub struct SseConnector {
    http: reqwest::Client,
}

impl SseConnector {
    /// Use an existing client (shares its connection pool and TLS config).
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl StreamConnector for SseConnector {
    fn open(&self, url: &Url) -> BoxStream<'static, StreamSignal> {
        let request = self.http.get(url.clone()).header(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );

        let mut source = match EventSource::new(request) {
            Ok(source) => source,
            Err(e) => {
                return stream::once(async move { StreamSignal::Failed(e.to_string()) }).boxed();
            }
        };
        source.set_retry_policy(Box::new(Never));

        tracing::debug!(%url, "opening event stream");

        source
            .map(|item| match item {
                Ok(Event::Open) => StreamSignal::Opened,
                Ok(Event::Message(message)) => StreamSignal::Event {
                    name: message.event,
                    data: message.data,
                },
                Err(e) => StreamSignal::Failed(e.to_string()),
            })
            .boxed()
    }
}
