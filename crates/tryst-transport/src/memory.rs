//! In-process loopback transport.
//!
//! [`pair`] returns a server-side [`MemoryConnection`] and the client-side
//! [`MemoryPeer`] that drives it. The peer-to-server direction is unbounded;
//! the server-to-peer direction is bounded, so a peer that stops reading
//! eventually stalls the writer exactly like a slow TCP client would.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{Connection, ConnectionId, FrameSink, FrameSource, Incoming, TransportError};

/// A frame observed by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFrame {
    /// An application frame.
    Text(Bytes),
    /// Keepalive probe.
    Ping,
    /// Close frame.
    Close,
}

enum ToServer {
    Frame(Bytes),
    Pong,
    Error(String),
}

/// Create a connected pair. `capacity` bounds the server-to-peer buffer.
#[must_use]
pub fn pair(capacity: usize) -> (MemoryConnection, MemoryPeer) {
    let (to_server_tx, to_server_rx) = mpsc::unbounded_channel();
    let (to_peer_tx, to_peer_rx) = mpsc::channel(capacity.max(1));

    let conn = MemoryConnection {
        id: ConnectionId::generate(),
        inbound: to_server_rx,
        outbound: to_peer_tx,
    };
    let peer = MemoryPeer {
        inbound: Some(to_server_tx),
        outbound: to_peer_rx,
    };
    (conn, peer)
}

/// Server side of a loopback pair.
pub struct MemoryConnection {
    id: ConnectionId,
    inbound: mpsc::UnboundedReceiver<ToServer>,
    outbound: mpsc::Sender<PeerFrame>,
}

impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameSink>, Box<dyn FrameSource>) {
        let Self {
            inbound, outbound, ..
        } = *self;
        (
            Box::new(MemorySink {
                outbound,
                closed: false,
            }),
            Box::new(MemorySource { inbound }),
        )
    }
}

struct MemorySource {
    inbound: mpsc::UnboundedReceiver<ToServer>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError> {
        match self.inbound.recv().await {
            Some(ToServer::Frame(data)) => Ok(Some(Incoming::Frame(data))),
            Some(ToServer::Pong) => Ok(Some(Incoming::KeepaliveAck)),
            Some(ToServer::Error(reason)) => Err(TransportError::ReceiveFailed(reason)),
            None => Ok(None),
        }
    }
}

struct MemorySink {
    outbound: mpsc::Sender<PeerFrame>,
    closed: bool,
}

impl MemorySink {
    async fn push(&mut self, frame: PeerFrame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_frame(&mut self, data: Bytes) -> Result<(), TransportError> {
        self.push(PeerFrame::Text(data)).await
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.push(PeerFrame::Ping).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let result = self.push(PeerFrame::Close).await;
        self.closed = true;
        result
    }
}

/// Client side of a loopback pair.
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<ToServer>>,
    outbound: mpsc::Receiver<PeerFrame>,
}

impl MemoryPeer {
    fn push(&self, msg: ToServer) -> bool {
        self.inbound
            .as_ref()
            .map(|tx| tx.send(msg).is_ok())
            .unwrap_or(false)
    }

    /// Send an application frame. Returns `false` once the server side is gone.
    pub fn send_text(&self, data: impl Into<Bytes>) -> bool {
        self.push(ToServer::Frame(data.into()))
    }

    /// Acknowledge a keepalive probe.
    pub fn send_pong(&self) -> bool {
        self.push(ToServer::Pong)
    }

    /// Make the server's next read fail with a transport error.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.push(ToServer::Error(reason.into()))
    }

    /// Close the peer-to-server direction, as a clean disconnect.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Wait for the next frame from the server.
    ///
    /// Returns `None` once the server dropped its write half.
    pub async fn recv(&mut self) -> Option<PeerFrame> {
        self.outbound.recv().await
    }

    /// Wait for the next application frame, skipping keepalive probes.
    pub async fn recv_text(&mut self) -> Option<Bytes> {
        loop {
            match self.outbound.recv().await? {
                PeerFrame::Text(data) => return Some(data),
                PeerFrame::Ping => continue,
                PeerFrame::Close => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (conn, mut peer) = pair(8);
        let (mut sink, mut source) = Box::new(conn).split();

        assert!(peer.send_text(&b"hello"[..]));
        assert_eq!(
            source.recv().await.unwrap(),
            Some(Incoming::Frame(Bytes::from_static(b"hello")))
        );

        assert!(peer.send_pong());
        assert_eq!(source.recv().await.unwrap(), Some(Incoming::KeepaliveAck));

        sink.send_frame(Bytes::from_static(b"world")).await.unwrap();
        sink.send_ping().await.unwrap();
        assert_eq!(peer.recv().await, Some(PeerFrame::Text(Bytes::from_static(b"world"))));
        assert_eq!(peer.recv().await, Some(PeerFrame::Ping));
    }

    #[tokio::test]
    async fn test_injected_error_and_hang_up() {
        let (conn, mut peer) = pair(8);
        let (_sink, mut source) = Box::new(conn).split();

        peer.fail("reset by peer");
        assert!(matches!(
            source.recv().await,
            Err(TransportError::ReceiveFailed(_))
        ));

        peer.hang_up();
        assert!(!peer.send_text(&b"late"[..]));
        assert_eq!(source.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_rejects_further_writes() {
        let (conn, mut peer) = pair(8);
        let (mut sink, _source) = Box::new(conn).split();

        sink.close().await.unwrap();
        assert_eq!(peer.recv().await, Some(PeerFrame::Close));
        assert!(matches!(
            sink.send_frame(Bytes::from_static(b"x")).await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
