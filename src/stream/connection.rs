//! A single push transport and its signals.

use std::fmt;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use url::Url;

/// Signal surfaced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSignal {
    /// The transport is established.
    Opened,
    /// A named event with its raw (undecoded) data.
    Event {
        /// Event name (SSE `event:` field, or the frame's `event` key).
        name: String,
        /// Raw event data, expected to be JSON.
        data: String,
    },
    /// The transport failed or ended. Always the last signal.
    Failed(String),
}

/// Opens transports. Implemented by [`SseConnector`](super::sse::SseConnector),
/// [`WsConnector`](super::ws::WsConnector), and test fakes.
pub trait StreamConnector: Send + Sync + 'static {
    /// Start connecting to `url`.
    ///
    /// The returned stream yields [`StreamSignal::Opened`] once established,
    /// then events, and ends after [`StreamSignal::Failed`]. Dropping the
    /// stream must release the underlying connection.
    fn open(&self, url: &Url) -> BoxStream<'static, StreamSignal>;
}

/// Exactly one transport to one endpoint.
///
/// On failure the underlying handle is released *before* the failure is
/// returned, so the caller can open a replacement without leaking the old
/// one. A transport that ends without an explicit failure is reported as
/// failed.
pub struct StreamConnection {
    url: Url,
    inner: Option<BoxStream<'static, StreamSignal>>,
}

impl fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConnection")
            .field("url", &self.url.as_str())
            .field("open", &self.is_open())
            .finish()
    }
}

impl StreamConnection {
    /// Open a transport to `url` through `connector`.
    pub fn open(connector: &dyn StreamConnector, url: Url) -> Self {
        let inner = connector.open(&url);
        Self {
            url,
            inner: Some(inner),
        }
    }

    /// Endpoint of this connection.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether the underlying handle is still held.
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Next signal, or `None` once closed.
    ///
    /// Cancel-safe: dropping the future before it resolves loses nothing.
    pub async fn next_signal(&mut self) -> Option<StreamSignal> {
        let inner = self.inner.as_mut()?;
        let signal = inner
            .next()
            .await
            .unwrap_or_else(|| StreamSignal::Failed("stream ended".into()));
        if let StreamSignal::Failed(reason) = &signal {
            tracing::debug!(url = %self.url, %reason, "stream failed");
            self.close();
        }
        Some(signal)
    }

    /// Release the underlying handle. Returns whether it was still held.
    /// Idempotent.
    pub fn close(&mut self) -> bool {
        self.inner.take().is_some()
    }
}
