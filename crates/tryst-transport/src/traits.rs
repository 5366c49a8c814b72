//! Transport abstraction traits for Tryst.
//!
//! A [`Connection`] is one physical duplex channel to one client. The hub
//! splits it into a [`FrameSource`] for the read pump and a [`FrameSink`] for
//! the write pump, so the two halves can be driven by separate tasks.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a physical connection.
///
/// Two connections of the same user always have different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0.simple())
    }
}

/// Something read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// An application frame (one encoded event).
    Frame(Bytes),
    /// Acknowledgment of a keepalive probe.
    KeepaliveAck,
}

/// Transport errors.
///
/// Every transport error is terminal for the connection that raised it.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Peer sent a frame above the configured limit.
    #[error("Frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),
}

/// Read half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next frame.
    ///
    /// Returns `Ok(None)` once the peer closed the connection cleanly.
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError>;
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one encoded event.
    async fn send_frame(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Send a liveness probe.
    async fn send_ping(&mut self) -> Result<(), TransportError>;

    /// Send a close frame and release the write half.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An accepted, not yet split connection.
pub trait Connection: Send {
    /// Get the connection's unique identifier.
    fn id(&self) -> ConnectionId;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Split into write and read halves.
    fn split(self: Box<Self>) -> (Box<dyn FrameSink>, Box<dyn FrameSource>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn_"));
    }
}
