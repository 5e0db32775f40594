//! Live viewer connections the fan-out pushes messages to.

use async_trait::async_trait;
use serde_json::value::RawValue;

mod websocket;

pub use websocket::WebSocketSink;

#[derive(Debug)]
pub enum SinkError {
    /// The peer already went away.
    Closed,
    Transport(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Closed => write!(f, "sink closed"),
            SinkError::Transport(e) => write!(f, "sink transport error: {}", e),
        }
    }
}

impl std::error::Error for SinkError {}

/// A bidirectional live connection owned by whoever accepted it.
///
/// The fan-out only ever sends on it and, at shutdown, closes it.
#[async_trait]
pub trait Sink: Send {
    /// Send one already-serialized structured message.
    async fn send_structured(&mut self, msg: &RawValue) -> Result<(), SinkError>;

    /// Send one raw text frame (legacy protocol).
    async fn send_text(&mut self, frame: &[u8]) -> Result<(), SinkError>;

    async fn close(&mut self) -> Result<(), SinkError>;
}
