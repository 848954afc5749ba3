//! Seam between the session pumps and the WebSocket library.
//!
//! The pumps only see `FrameSink` and a stream of `WireFrame`s, which keeps
//! them independent of actix-ws and lets tests drive them over channels.

use actix_ws::{Message, MessageStream, Session};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{LocalBoxStream, StreamExt};
use thiserror::Error;

/// Inbound frame as the read pump sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Ping(Bytes),
    Pong,
    Close,
    /// Binary and continuation frames; the chat protocol is text only
    Unsupported(&'static str),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("write timed out")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<actix_ws::Closed> for TransportError {
    fn from(_: actix_ws::Closed) -> Self {
        TransportError::Closed
    }
}

/// Outbound half of a connection. Owned by exactly one write pump.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    async fn send_ping(&mut self) -> Result<(), TransportError>;

    async fn send_pong(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Send a close frame. Errors are irrelevant at this point.
    async fn close(&mut self);
}

pub struct ActixSink {
    session: Option<Session>,
}

impl ActixSink {
    pub fn new(session: Session) -> Self {
        Self {
            session: Some(session),
        }
    }

    fn session(&mut self) -> Result<&mut Session, TransportError> {
        self.session.as_mut().ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl FrameSink for ActixSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        Ok(self.session()?.text(text).await?)
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        Ok(self.session()?.ping(b"").await?)
    }

    async fn send_pong(&mut self, payload: Bytes) -> Result<(), TransportError> {
        Ok(self.session()?.pong(&payload).await?)
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.close(None).await;
        }
    }
}

/// Inbound frames of an actix-ws connection, with oversized frames rejected
/// by the codec as protocol errors.
pub fn inbound_frames(
    stream: MessageStream,
    max_frame_bytes: usize,
) -> LocalBoxStream<'static, Result<WireFrame, TransportError>> {
    stream
        .max_frame_size(max_frame_bytes)
        .filter_map(|item| async move {
            match item {
                Ok(message) => wire_frame(message).map(Ok),
                Err(e) => Some(Err(TransportError::Protocol(e.to_string()))),
            }
        })
        .boxed_local()
}

fn wire_frame(message: Message) -> Option<WireFrame> {
    match message {
        Message::Text(text) => Some(WireFrame::Text(text.to_string())),
        Message::Ping(payload) => Some(WireFrame::Ping(payload)),
        Message::Pong(_) => Some(WireFrame::Pong),
        Message::Close(_) => Some(WireFrame::Close),
        Message::Binary(_) => Some(WireFrame::Unsupported("binary")),
        Message::Continuation(_) => Some(WireFrame::Unsupported("continuation")),
        Message::Nop => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_frame_mapping() {
        assert_eq!(
            wire_frame(Message::Text("hi".into())),
            Some(WireFrame::Text("hi".into()))
        );
        assert_eq!(
            wire_frame(Message::Binary(Bytes::from_static(b"\x00"))),
            Some(WireFrame::Unsupported("binary"))
        );
        assert_eq!(wire_frame(Message::Close(None)), Some(WireFrame::Close));
        assert_eq!(wire_frame(Message::Nop), None);
    }
}
