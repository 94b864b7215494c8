//! Push transports.
//!
//! A [`StreamConnection`](connection::StreamConnection) owns exactly one
//! transport to one URL and surfaces three signals: *opened*,
//! *event(name, data)* and *failed*. It never retries; that is the job of
//! [`ResilientSubscription`](crate::feed::subscription::ResilientSubscription).
//!
//! Transports plug in through [`StreamConnector`](connection::StreamConnector):
//!
//! ## [`sse`]: Server-Sent Events
//!
//! `GET` with `Accept: text/event-stream`; each SSE `event:` name and `data:`
//! body becomes one signal. Built on `reqwest-eventsource` with its internal
//! retry disabled.
//!
//! ## [`ws`]: WebSocket
//!
//! For backends that push the same named events over a WebSocket as JSON text
//! frames of the form `{"event": "<name>", "data": <payload>}`. Built on
//! `tokio-tungstenite`.

pub mod connection;
pub mod sse;
pub mod ws;

pub use connection::{StreamConnection, StreamConnector, StreamSignal};
