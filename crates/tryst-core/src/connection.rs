//! Per-connection pumps and lifecycle.
//!
//! Every registered connection is driven by two tasks. The read pump decodes
//! client requests and hands them to the hub under a sliding read deadline.
//! The write pump drains the connection's outbound queue and sends periodic
//! keepalive probes. A supervisor marks the session closed once both exit.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use tryst_protocol::{codec, UserId};
use tryst_transport::{Connection, ConnectionId, FrameSink, FrameSource, Incoming, TransportError};

use crate::hub::{Hub, HubError};
use crate::registry::ConnectionHandle;
use crate::telemetry;

/// Lifecycle state of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    /// Accepted, not yet registered.
    Connecting,
    /// Registered and receiving events.
    Registered,
    /// A pump has stopped; the other is winding down.
    Draining,
    /// Both pumps exited.
    Closed,
}

/// Why a pump asked for its connection to be unregistered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client closed the connection.
    PeerClosed,
    /// Reading from the transport failed.
    ReadError,
    /// Nothing arrived before the read deadline.
    ReadTimeout,
    /// Writing to the transport failed.
    WriteError,
    /// A write did not finish before the write deadline.
    WriteTimeout,
    /// The write pump stopped first.
    WriterClosed,
}

impl DisconnectReason {
    /// Label used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::ReadError => "read_error",
            Self::ReadTimeout => "read_timeout",
            Self::WriteError => "write_error",
            Self::WriteTimeout => "write_timeout",
            Self::WriterClosed => "writer_closed",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
struct Lifecycle(Arc<watch::Sender<ConnectionState>>);

impl Lifecycle {
    fn new() -> (Self, watch::Receiver<ConnectionState>) {
        let (tx, rx) = watch::channel(ConnectionState::Connecting);
        (Self(Arc::new(tx)), rx)
    }

    fn advance(&self, next: ConnectionState) -> bool {
        self.0.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.0.subscribe()
    }
}

async fn reached(state: &mut watch::Receiver<ConnectionState>, target: ConnectionState) {
    let _ = state.wait_for(|s| *s >= target).await;
}

/// Observer for a registered connection.
#[derive(Debug, Clone)]
pub struct Session {
    id: ConnectionId,
    user: UserId,
    state: watch::Receiver<ConnectionState>,
}

impl Session {
    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Owning user.
    #[must_use]
    pub fn user(&self) -> UserId {
        self.user
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until both pumps have exited.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        reached(&mut state, ConnectionState::Closed).await;
    }
}

impl Hub {
    /// Register `connection` as the single active connection of `user` and
    /// start its pumps.
    ///
    /// Any previous connection of the same user is replaced and closed.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Shutdown`] if the hub is gone; the connection is
    /// dropped in that case.
    pub async fn register_connection(
        &self,
        user: UserId,
        connection: Box<dyn Connection>,
    ) -> Result<Session, HubError> {
        let id = connection.id();
        let remote = connection.remote_addr();
        let (lifecycle, state) = Lifecycle::new();

        let (handle, outbound) = ConnectionHandle::new(id, user, self.config().outbound_capacity);
        let (sink, source) = connection.split();

        self.register(handle).await?;
        lifecycle.advance(ConnectionState::Registered);
        telemetry::record_connection_opened();
        info!(user = %user, connection = %id, remote = ?remote, "Connection registered");

        let reader = tokio::spawn(read_pump(
            self.clone(),
            user,
            id,
            source,
            lifecycle.clone(),
        ));
        let writer = tokio::spawn(write_pump(
            self.clone(),
            user,
            id,
            sink,
            outbound,
            lifecycle.clone(),
        ));

        tokio::spawn(async move {
            let _ = reader.await;
            let _ = writer.await;
            lifecycle.advance(ConnectionState::Closed);
            telemetry::record_connection_closed();
            debug!(user = %user, connection = %id, "Connection closed");
        });

        Ok(Session { id, user, state })
    }
}

async fn read_pump(
    hub: Hub,
    user: UserId,
    id: ConnectionId,
    mut source: Box<dyn FrameSource>,
    lifecycle: Lifecycle,
) {
    let read_timeout = hub.config().read_timeout;
    let mut deadline = Instant::now() + read_timeout;
    let mut state = lifecycle.subscribe();

    let reason = loop {
        let next = tokio::select! {
            () = reached(&mut state, ConnectionState::Draining) => break DisconnectReason::WriterClosed,
            next = timeout_at(deadline, source.recv()) => next,
        };

        match next {
            Err(_) => break DisconnectReason::ReadTimeout,
            Ok(Ok(None)) => break DisconnectReason::PeerClosed,
            Ok(Err(TransportError::FrameTooLarge(size))) => {
                warn!(user = %user, connection = %id, size, "Inbound frame too large");
                telemetry::record_error("frame_too_large");
                break DisconnectReason::ReadError;
            }
            Ok(Err(e)) => {
                debug!(user = %user, connection = %id, error = %e, "Read failed");
                break DisconnectReason::ReadError;
            }
            Ok(Ok(Some(Incoming::KeepaliveAck))) => {
                trace!(user = %user, connection = %id, "Keepalive acknowledged");
                deadline = Instant::now() + read_timeout;
            }
            Ok(Ok(Some(Incoming::Frame(data)))) => {
                deadline = Instant::now() + read_timeout;
                match codec::decode_inbound(&data) {
                    Ok(inbound) => {
                        telemetry::record_event(inbound.kind(), "inbound");
                        hub.dispatch(user, inbound).await;
                    }
                    Err(e) => {
                        debug!(user = %user, connection = %id, error = %e, "Discarding malformed frame");
                        telemetry::record_error("protocol");
                    }
                }
            }
        }
    };

    lifecycle.advance(ConnectionState::Draining);
    if let Err(e) = hub.unregister(user, id, reason).await {
        debug!(user = %user, connection = %id, error = %e, "Unregister after read failed");
    }
}

async fn write_pump(
    hub: Hub,
    user: UserId,
    id: ConnectionId,
    mut sink: Box<dyn FrameSink>,
    mut outbound: mpsc::Receiver<Bytes>,
    lifecycle: Lifecycle,
) {
    let config = hub.config().clone();
    let mut keepalive = interval_at(
        Instant::now() + config.keepalive_interval,
        config.keepalive_interval,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        let written = tokio::select! {
            payload = outbound.recv() => match payload {
                Some(data) => timeout(config.write_timeout, sink.send_frame(data)).await,
                None => {
                    // Queue closed: unregistered, replaced or evicted
                    trace!(user = %user, connection = %id, "Outbound queue closed");
                    lifecycle.advance(ConnectionState::Draining);
                    let _ = timeout(config.write_timeout, sink.close()).await;
                    return;
                }
            },
            _ = keepalive.tick() => {
                trace!(user = %user, connection = %id, "Sending keepalive");
                timeout(config.write_timeout, sink.send_ping()).await
            }
        };

        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(user = %user, connection = %id, error = %e, "Write failed");
                break DisconnectReason::WriteError;
            }
            Err(_) => break DisconnectReason::WriteTimeout,
        }
    };

    lifecycle.advance(ConnectionState::Draining);
    if let Err(e) = hub.unregister(user, id, reason).await {
        debug!(user = %user, connection = %id, error = %e, "Unregister after write failed");
    }
    let _ = timeout(config.write_timeout, sink.close()).await;
}
