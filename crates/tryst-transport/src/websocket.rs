//! WebSocket transport implementation.
//!
//! Adapts an upgraded `axum` WebSocket to the [`Connection`] traits.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::{debug, trace, warn};

use crate::traits::{Connection, ConnectionId, FrameSink, FrameSource, Incoming, TransportError};

/// Default maximum inbound message size (64 KB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// An upgraded WebSocket connection.
pub struct AxumConnection {
    id: ConnectionId,
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    max_message_size: usize,
}

impl AxumConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self {
            id: ConnectionId::generate(),
            socket,
            remote_addr: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Record the peer address, for logging.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Set the maximum accepted inbound message size.
    #[must_use]
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }
}

impl Connection for AxumConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|a| a.to_string())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameSink>, Box<dyn FrameSource>) {
        let Self {
            id,
            socket,
            max_message_size,
            ..
        } = *self;
        let (sink, stream) = socket.split();
        (
            Box::new(WebSocketSink { id, sink }),
            Box::new(WebSocketSource {
                id,
                stream,
                max_message_size,
            }),
        )
    }
}

struct WebSocketSource {
    id: ConnectionId,
    stream: SplitStream<WebSocket>,
    max_message_size: usize,
}

impl WebSocketSource {
    fn frame(&self, data: Bytes) -> Result<Option<Incoming>, TransportError> {
        if data.len() > self.max_message_size {
            warn!(
                connection = %self.id,
                size = data.len(),
                max = self.max_message_size,
                "Message too large"
            );
            return Err(TransportError::FrameTooLarge(data.len()));
        }
        Ok(Some(Incoming::Frame(data)))
    }
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return self.frame(Bytes::from(text)),
                Some(Ok(Message::Binary(data))) => return self.frame(Bytes::from(data)),
                Some(Ok(Message::Pong(_))) => return Ok(Some(Incoming::KeepaliveAck)),
                Some(Ok(Message::Ping(_))) => {
                    // Answered by the protocol layer on the next flush
                    trace!(connection = %self.id, "Received ping");
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %self.id, "Received close frame");
                    return Ok(None);
                }
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}

struct WebSocketSink {
    id: ConnectionId,
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_frame(&mut self, data: Bytes) -> Result<(), TransportError> {
        let text = String::from_utf8(data.to_vec())
            .map_err(|e| TransportError::SendFailed(format!("frame is not UTF-8: {e}")))?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        debug!(connection = %self.id, "Closing WebSocket");
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {e}")))
    }
}
