//! WebSocket transport.
//!
//! Connects to the same endpoint shapes as the SSE transport with the scheme
//! switched to `ws`/`wss`, and expects each text frame to be a JSON object
//! `{"event": "<name>", "data": <payload>}`. A text frame that is not such an
//! object is delivered as a `"message"` event carrying the raw text, which is
//! what an SSE server sends for unnamed events.
//!
//! Ping/pong is handled by tungstenite. A close frame, stream end, or
//! protocol error is reported as [`StreamSignal::Failed`].

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::connection::{StreamConnector, StreamSignal};
use crate::error::{FeedError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frame layout pushed by the server.
#[derive(Debug, Deserialize)]
struct PushFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Opens WebSocket push connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

/// Map an `http(s)` endpoint onto `ws(s)`. Other schemes pass through.
pub fn websocket_url(url: &Url) -> Result<Url> {
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(url.clone()),
        other => {
            return Err(FeedError::InvalidArgument(format!(
                "cannot open a WebSocket over {other}://"
            )));
        }
    };
    let mut ws_url = url.clone();
    ws_url
        .set_scheme(scheme)
        .map_err(|()| FeedError::InvalidArgument(format!("cannot rewrite scheme of {url}")))?;
    Ok(ws_url)
}

async fn connect(url: Url) -> Result<WsStream> {
    let ws_url = websocket_url(&url)?;
    let (ws, _resp) = connect_async(ws_url.as_str()).await?;
    tracing::info!(url = %ws_url, "Connected to push WebSocket");
    Ok(ws)
}

fn decode_frame(text: &str) -> StreamSignal {
    match serde_json::from_str::<PushFrame>(text) {
        Ok(frame) => StreamSignal::Event {
            name: frame.event,
            data: frame.data.to_string(),
        },
        Err(_) => StreamSignal::Event {
            name: "message".into(),
            data: text.to_owned(),
        },
    }
}

enum Phase {
    Connect(Url),
    Open(Box<WsStream>),
    Done,
}

impl StreamConnector for WsConnector {
    fn open(&self, url: &Url) -> BoxStream<'static, StreamSignal> {
        stream::unfold(Phase::Connect(url.clone()), |phase| async move {
            match phase {
                Phase::Connect(url) => match connect(url).await {
                    Ok(ws) => Some((StreamSignal::Opened, Phase::Open(Box::new(ws)))),
                    Err(e) => Some((StreamSignal::Failed(e.to_string()), Phase::Done)),
                },
                Phase::Open(mut ws) => loop {
                    match ws.next().await {
                        Some(Ok(Message::Text(text))) => {
                            return Some((decode_frame(&text), Phase::Open(ws)));
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Push WebSocket closed by server");
                            return Some((
                                StreamSignal::Failed("closed by server".into()),
                                Phase::Done,
                            ));
                        }
                        // Ping/pong handled automatically by tungstenite
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            let e = FeedError::WebSocket(e);
                            return Some((StreamSignal::Failed(e.to_string()), Phase::Done));
                        }
                        None => {
                            return Some((
                                StreamSignal::Failed("stream ended".into()),
                                Phase::Done,
                            ));
                        }
                    }
                },
                Phase::Done => None,
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_url_switches_scheme() {
        let url = Url::parse("https://api.example.com/sse/stream?topics=a,b").unwrap();
        assert_eq!(
            websocket_url(&url).unwrap().as_str(),
            "wss://api.example.com/sse/stream?topics=a,b"
        );

        let url = Url::parse("http://localhost:8080/sse/prices").unwrap();
        assert_eq!(
            websocket_url(&url).unwrap().as_str(),
            "ws://localhost:8080/sse/prices"
        );

        let url = Url::parse("ftp://example.com/x").unwrap();
        assert!(websocket_url(&url).is_err());
    }

    #[test]
    fn frames_decode_to_named_events() {
        assert_eq!(
            decode_frame(r#"{"event":"prices","data":{"BTC":100}}"#),
            StreamSignal::Event {
                name: "prices".into(),
                data: r#"{"BTC":100}"#.into(),
            }
        );
        assert_eq!(
            decode_frame("hello"),
            StreamSignal::Event {
                name: "message".into(),
                data: "hello".into(),
            }
        );
    }
}
