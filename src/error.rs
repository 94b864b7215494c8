//! Error types for the `livefeed` crate.
//!
//! All fallible operations in this crate return [`Result<T>`], which is an
//! alias for `std::result::Result<T, FeedError>`.
//!
//! Steady-state stream and polling failures are never surfaced through this
//! type. They are expressed through
//! [`ConnectionState`](crate::types::ConnectionState) instead. [`FeedError`]
//! covers:
//! - **Configuration errors**: No endpoint base URL where one is required
//! - **API errors**: Structured error bodies returned by the REST backend
//! - **HTTP status errors**: Unexpected status codes with response body
//! - **HTTP transport errors**: Network, TLS, timeout failures
//! - **JSON errors**: Deserialization failures
//! - **WebSocket errors**: Connection and protocol errors
//! - **URL errors**: Malformed URL construction
//! - **Invalid arguments**: Rejected topic names, scopes, or bounds

use std::fmt;

/// Error body returned by the REST backend.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiErrorBody {
    /// Short machine-readable error code.
    #[serde(default)]
    pub error: Option<String>,
    /// Human-readable description of the error.
    #[serde(default)]
    pub message: Option<String>,
}

impl fmt::Display for ApiErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            self.error.as_deref().unwrap_or("unknown_error"),
            self.message.as_deref().unwrap_or("No message"),
        )
    }
}

/// All possible errors produced by the `livefeed` crate.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// No endpoint is configured in a context that requires one.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An error response returned by the REST backend.
    #[error("API error: {0}")]
    Api(ApiErrorBody),

    /// The server returned an unexpected HTTP status code.
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        /// The HTTP status code.
        status: reqwest::StatusCode,
        /// The response body text.
        body: String,
    },

    /// A network or transport-level error from `reqwest`.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed to deserialize a JSON body.
    #[error("JSON deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A WebSocket-level error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// An error building or parsing a URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// The caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FeedError>;
