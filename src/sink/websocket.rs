use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use serde_json::value::RawValue;

use super::{Sink, SinkError};

/// Write half of an accepted WebSocket.
///
/// The read half stays with the connection handler, which drains it until
/// the peer disconnects.
pub struct WebSocketSink {
    inner: SplitSink<WebSocket, Message>,
    closed: bool,
}

impl WebSocketSink {
    pub fn new(inner: SplitSink<WebSocket, Message>) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    async fn send(&mut self, msg: Message) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        self.inner
            .send(msg)
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))
    }
}

/// Text frames must be UTF-8 on the wire; anything else goes out as binary.
fn text_frame(frame: &[u8]) -> Message {
    match std::str::from_utf8(frame) {
        Ok(text) => Message::Text(text.to_string()),
        Err(_) => Message::Binary(frame.to_vec()),
    }
}

#[async_trait]
impl Sink for WebSocketSink {
    async fn send_structured(&mut self, msg: &RawValue) -> Result<(), SinkError> {
        self.send(Message::Text(msg.get().to_string())).await
    }

    async fn send_text(&mut self, frame: &[u8]) -> Result<(), SinkError> {
        self.send(text_frame(frame)).await
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // The peer may have vanished already; the close frame is best effort.
        let _ = self.inner.send(Message::Close(None)).await;
        self.inner
            .close()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))
    }
}
