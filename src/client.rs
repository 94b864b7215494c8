//! REST client used by the polling fallback.
//!
//! The [`FeedClient`] wraps [`reqwest::Client`] with the backend base URL and
//! provides typed `GET` helpers. It is the default
//! [`PollSource`](crate::feed::polling::PollSource) and can also serve
//! one-shot reads of the same resources.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::config::FeedConfig;
use crate::error::{ApiErrorBody, FeedError, Result};
use crate::feed::polling::PollSource;

/// REST client for the feed backend.
///
/// # Example
///
/// ```no_run
/// use livefeed::{FeedClient, FeedConfig};
///
/// # #[tokio::main]
/// # async fn main() -> livefeed::Result<()> {
/// let client = FeedClient::new(&FeedConfig::new("https://api.example.com")?)?;
/// let prices: serde_json::Value = client.get("/prices").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FeedClient {
    http: reqwest::Client,
    /// Base URL for REST requests.
    base_url: Url,
}

impl FeedClient {
    /// Create a client for the configured base URL.
    ///
    /// Fails with [`FeedError::Config`] when no base URL is configured.
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let base_url = config.require_base_url()?.clone();
        let http = reqwest::Client::builder()
            .default_headers(Self::default_headers())
            .build()?;
        Ok(Self { http, base_url })
    }

    /// Create a client around an existing [`reqwest::Client`].
    pub fn with_http(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// Returns a reference to the underlying `reqwest::Client`.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // -----------------------------------------------------------------------
    // Generic HTTP helpers
    // -----------------------------------------------------------------------

    /// Perform a GET on a path relative to the base URL and deserialize the
    /// JSON response.
    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let url = self.url(path)?;
        self.get_url(url).await
    }

    /// Perform a GET on an absolute URL and deserialize the JSON response.
    pub async fn get_url<R: DeserializeOwned>(&self, url: Url) -> Result<R> {
        tracing::debug!(%url, "GET");
        let resp = self.http.get(url).send().await?;
        self.handle_response(resp).await
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn url(&self, path: &str) -> Result<Url> {
        resolve_path(&self.base_url, path)
    }

    /// Default headers applied to every request.
    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    /// Read a response, returning either the deserialized body or a `FeedError`.
    async fn handle_response<R: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<R> {
        let status = resp.status();
        let bytes = resp.bytes().await?;

        if status.is_success() {
            serde_json::from_slice(&bytes).map_err(FeedError::Json)
        } else {
            let body = String::from_utf8_lossy(&bytes);
            Err(Self::parse_error_body(status, &body))
        }
    }

    /// Try to parse the backend's JSON error structure; fall back to a raw
    /// HTTP status error.
    fn parse_error_body(status: reqwest::StatusCode, body: &str) -> FeedError {
        if let Ok(api_err) = serde_json::from_str::<ApiErrorBody>(body) {
            if api_err.error.is_some() || api_err.message.is_some() {
                return FeedError::Api(api_err);
            }
        }
        FeedError::HttpStatus {
            status,
            body: body.to_owned(),
        }
    }
}

/// Resolve a path (with optional query) against `base`, keeping any path
/// prefix the base carries.
pub(crate) fn resolve_path(base: &Url, path: &str) -> Result<Url> {
    let (path, query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| FeedError::InvalidArgument("base URL cannot carry path segments".into()))?
        .pop_if_empty()
        .extend(path.split('/').filter(|s| !s.is_empty()));
    url.set_query(query);
    Ok(url)
}

impl PollSource for FeedClient {
    fn fetch(&self, url: Url) -> BoxFuture<'static, Result<Value>> {
        let client = self.clone();
        async move { client.get_url(url).await }.boxed()
    }
}
