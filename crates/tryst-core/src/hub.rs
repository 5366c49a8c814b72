//! The presence and message-delivery hub.
//!
//! All registry mutations and delivery decisions run on one coordinating
//! task fed by a command queue. Store I/O never runs there: callers resolve
//! targets first, and presence changes produced by the coordinator are
//! handed to a single presence worker that resolves match peers and submits
//! the resulting deliveries back as commands.
//!
//! ```text
//!  read pumps ──┐                        ┌──▶ outbound queue ──▶ write pump
//!  Hub API ─────┼──▶ command queue ──▶ coordinator (Registry)
//!  presence ────┘                        └──▶ presence changes ──▶ presence worker
//!  worker  ◀────────────────────────────────────────────────────────┘
//! ```

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use tryst_protocol::{codec, Event, EventKind, Inbound, MatchId, PresenceStatus, ProtocolError, StoredMessage, UserId};
use tryst_transport::ConnectionId;

use crate::connection::DisconnectReason;
use crate::registry::{ConnectionHandle, DeliveryOutcome, Registry};
use crate::router::Router;
use crate::store::{SharedStore, StoreError};
use crate::telemetry;

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The coordinating task is gone.
    #[error("Hub is shut down")]
    Shutdown,

    /// A store call failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The sender has no active match with this id.
    #[error("User {user} has no active match {match_id}")]
    UnknownMatch { user: UserId, match_id: MatchId },

    /// An outbound event could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each connection's outbound queue.
    pub outbound_capacity: usize,
    /// Capacity of the coordinator's command queue.
    pub command_capacity: usize,
    /// Interval between keepalive probes.
    pub keepalive_interval: Duration,
    /// Read deadline, refreshed by every inbound frame or keepalive ack.
    pub read_timeout: Duration,
    /// Deadline for each outbound write.
    pub write_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            command_capacity: 1024,
            keepalive_interval: Duration::from_secs(54),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Commands processed by the coordinating task.
#[derive(Debug)]
enum Command {
    Register(ConnectionHandle),
    Unregister {
        user: UserId,
        connection: ConnectionId,
        reason: DisconnectReason,
    },
    Disconnect {
        user: UserId,
    },
    Deliver {
        targets: Vec<UserId>,
        payload: Bytes,
    },
    IsOnline {
        user: UserId,
        reply: oneshot::Sender<bool>,
    },
    ConnectionOf {
        user: UserId,
        reply: oneshot::Sender<Option<ConnectionId>>,
    },
    OnlineUsers {
        reply: oneshot::Sender<Vec<UserId>>,
    },
}

type PresenceChange = (UserId, PresenceStatus);

/// Handle to a running hub.
///
/// Cheap to clone; every clone talks to the same coordinating task. The
/// coordinator stops once the last clone is dropped.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
    router: Router,
    store: SharedStore,
    config: Arc<HubConfig>,
}

impl Hub {
    /// Start a hub over `store`.
    ///
    /// Spawns the coordinating task and the presence worker, so it must be
    /// called from within a Tokio runtime.
    #[must_use]
    pub fn new(store: SharedStore, config: HubConfig) -> Self {
        info!("Starting hub with config: {:?}", config);

        let (commands, command_rx) = mpsc::channel(config.command_capacity.max(1));
        let (presence_tx, presence_rx) = mpsc::unbounded_channel();
        let router = Router::new(store.clone());

        let coordinator = Coordinator {
            registry: Registry::new(),
            presence: presence_tx,
        };
        tokio::spawn(coordinator.run(command_rx));
        tokio::spawn(presence_worker(
            router.clone(),
            commands.downgrade(),
            presence_rx,
        ));

        Self {
            commands,
            router,
            store,
            config: Arc::new(config),
        }
    }

    /// Hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// The store this hub persists to.
    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    async fn submit(&self, command: Command) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Shutdown)
    }

    async fn query<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, HubError> {
        let (reply, rx) = oneshot::channel();
        self.submit(build(reply)).await?;
        rx.await.map_err(|_| HubError::Shutdown)
    }

    /// Register a handle, replacing any existing one for the same user, and
    /// announce the user as online to their matches.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Shutdown`] if the coordinator is gone.
    pub async fn register(&self, handle: ConnectionHandle) -> Result<(), HubError> {
        self.submit(Command::Register(handle)).await
    }

    /// Request removal of `connection`. Ignored unless it is still the
    /// registered connection of `user`, so repeated or stale requests are
    /// harmless.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Shutdown`] if the coordinator is gone.
    pub async fn unregister(
        &self,
        user: UserId,
        connection: ConnectionId,
        reason: DisconnectReason,
    ) -> Result<(), HubError> {
        self.submit(Command::Unregister {
            user,
            connection,
            reason,
        })
        .await
    }

    /// Drop whatever connection `user` currently has, e.g. on logout.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Shutdown`] if the coordinator is gone.
    pub async fn disconnect(&self, user: UserId) -> Result<(), HubError> {
        self.submit(Command::Disconnect { user }).await
    }

    /// Enqueue an encoded event for `user` without waiting on the recipient.
    ///
    /// The event is dropped if the user is offline. If the user's queue is
    /// full the event is dropped and the connection evicted.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Shutdown`] if the coordinator is gone.
    pub async fn deliver_to_user(&self, user: UserId, payload: Bytes) -> Result<(), HubError> {
        self.submit(Command::Deliver {
            targets: vec![user],
            payload,
        })
        .await
    }

    /// Send a `user_status` event to every online match peer of `user`.
    ///
    /// Returns the number of peers the event was addressed to.
    ///
    /// # Errors
    ///
    /// Returns an error if the peers cannot be resolved or the hub is gone.
    pub async fn broadcast_presence(
        &self,
        user: UserId,
        status: PresenceStatus,
    ) -> Result<usize, HubError> {
        fan_out_presence(&self.router, &self.commands, user, status).await
    }

    /// Persist a message from `sender` in `match_id` and deliver it to the
    /// other participant.
    ///
    /// Delivery is attempted only after the message is stored. The stored
    /// record is returned whether or not the recipient was online.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::EmptyMessage`] for a blank body, or an error
    /// if persistence fails; nothing is delivered then.
    pub async fn send_to_match(
        &self,
        sender: UserId,
        match_id: MatchId,
        body: &str,
    ) -> Result<StoredMessage, HubError> {
        if body.trim().is_empty() {
            return Err(ProtocolError::EmptyMessage.into());
        }

        let stored = self.store.persist_message(match_id, sender, body).await?;
        trace!(user = %sender, match_id = %match_id, message = %stored.id, "Message persisted");

        let recipient = match self.router.peer_in_match(sender, match_id).await {
            Ok(Some(peer)) => peer,
            Ok(None) => {
                warn!(user = %sender, match_id = %match_id, "Stored message has no recipient");
                return Ok(stored);
            }
            Err(e) => {
                warn!(user = %sender, match_id = %match_id, error = %e, "Cannot resolve recipient");
                return Ok(stored);
            }
        };

        let payload = codec::encode(&Event::new_message(&stored))?;
        telemetry::record_event(EventKind::NewMessage, "outbound");
        self.deliver_to_user(recipient, payload).await?;
        Ok(stored)
    }

    /// Relay a typing indicator from `sender` to the other participant of
    /// `match_id`. Nothing is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::UnknownMatch`] if the sender is not part of the
    /// match, or an error if the lookup fails.
    pub async fn send_typing(&self, sender: UserId, match_id: MatchId) -> Result<(), HubError> {
        let recipient = self
            .router
            .peer_in_match(sender, match_id)
            .await?
            .ok_or(HubError::UnknownMatch {
                user: sender,
                match_id,
            })?;

        let payload = codec::encode(&Event::typing(match_id, sender))?;
        telemetry::record_event(EventKind::Typing, "outbound");
        self.deliver_to_user(recipient, payload).await
    }

    /// Handle a validated client request. Failures are logged and the
    /// request is dropped; the sender gets no error frame.
    pub async fn dispatch(&self, sender: UserId, inbound: Inbound) {
        trace!(user = %sender, match_id = %inbound.match_id(), kind = ?inbound.kind(), "Dispatching request");
        match inbound {
            Inbound::SendMessage { match_id, body } => {
                match self.send_to_match(sender, match_id, &body).await {
                    Ok(stored) => {
                        debug!(user = %sender, match_id = %match_id, message = %stored.id, "Message sent");
                    }
                    Err(HubError::Store(e)) => {
                        warn!(user = %sender, match_id = %match_id, error = %e, "Failed to persist message, dropping");
                        telemetry::record_error("persistence");
                    }
                    Err(e) => {
                        warn!(user = %sender, match_id = %match_id, error = %e, "Message dropped");
                    }
                }
            }
            Inbound::Typing { match_id } => {
                if let Err(e) = self.send_typing(sender, match_id).await {
                    debug!(user = %sender, match_id = %match_id, error = %e, "Typing indicator dropped");
                }
            }
        }
    }

    /// Check if `user` has a registered connection.
    pub async fn is_online(&self, user: UserId) -> bool {
        self.query(|reply| Command::IsOnline { user, reply })
            .await
            .unwrap_or(false)
    }

    /// The registered connection of `user`, if any.
    pub async fn connection_of(&self, user: UserId) -> Option<ConnectionId> {
        self.query(|reply| Command::ConnectionOf { user, reply })
            .await
            .ok()
            .flatten()
    }

    /// All users with a registered connection.
    pub async fn online_users(&self) -> Vec<UserId> {
        self.query(|reply| Command::OnlineUsers { reply })
            .await
            .unwrap_or_default()
    }
}

/// Owner of the registry. Runs on its own task.
struct Coordinator {
    registry: Registry,
    presence: mpsc::UnboundedSender<PresenceChange>,
}

impl Coordinator {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        if self.registry.is_empty() {
            debug!("Hub coordinator stopped");
        } else {
            debug!(remaining = self.registry.len(), "Hub coordinator stopped with users registered");
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register(handle) => {
                let (user, connection) = (handle.user(), handle.id());
                if let Some(replaced) = self.registry.register(handle) {
                    info!(user = %user, old = %replaced.id(), new = %connection, "Connection replaced");
                }
                info!(user = %user, connection = %connection, "User connected");
                self.announce(user, PresenceStatus::Online);
            }

            Command::Unregister {
                user,
                connection,
                reason,
            } => {
                if self.registry.unregister(user, connection).is_some() {
                    info!(user = %user, connection = %connection, reason = %reason, "User disconnected");
                    self.announce(user, PresenceStatus::Offline);
                } else {
                    trace!(user = %user, connection = %connection, reason = %reason, "Unregister ignored");
                }
            }

            Command::Disconnect { user } => {
                if let Some(handle) = self.registry.remove(user) {
                    info!(user = %user, connection = %handle.id(), "User logged out");
                    self.announce(user, PresenceStatus::Offline);
                }
            }

            Command::Deliver { targets, payload } => {
                for target in targets {
                    self.deliver(target, payload.clone());
                }
            }

            Command::IsOnline { user, reply } => {
                let _ = reply.send(self.registry.contains(user));
            }

            Command::ConnectionOf { user, reply } => {
                let _ = reply.send(self.registry.get(user).map(ConnectionHandle::id));
            }

            Command::OnlineUsers { reply } => {
                let _ = reply.send(self.registry.users());
            }
        }
    }

    fn deliver(&mut self, target: UserId, payload: Bytes) {
        let outcome = self.registry.deliver(target, payload);
        match outcome {
            DeliveryOutcome::Enqueued => {
                trace!(user = %target, "Event enqueued");
            }
            DeliveryOutcome::Offline => {
                trace!(user = %target, "Recipient offline, event dropped");
                telemetry::record_drop("offline");
            }
            DeliveryOutcome::Evicted => {
                warn!(user = %target, "Outbound queue full, evicting unresponsive connection");
                telemetry::record_drop("queue_full");
                telemetry::record_eviction();
            }
            DeliveryOutcome::Disconnected => {
                debug!(user = %target, "Recipient writer gone, removing registration");
                telemetry::record_drop("disconnected");
            }
        }

        if outcome.removed_recipient() {
            self.announce(target, PresenceStatus::Offline);
        }
    }

    fn announce(&self, user: UserId, status: PresenceStatus) {
        telemetry::set_users_online(self.registry.len());
        if self.presence.send((user, status)).is_err() {
            warn!(user = %user, status = %status, "Presence worker gone, change not broadcast");
        }
    }
}

/// Resolves match peers for presence changes, one change at a time, so the
/// changes of one user reach peers in the order they happened.
async fn presence_worker(
    router: Router,
    commands: mpsc::WeakSender<Command>,
    mut changes: mpsc::UnboundedReceiver<PresenceChange>,
) {
    while let Some((user, status)) = changes.recv().await {
        let Some(commands) = commands.upgrade() else {
            break;
        };
        if let Err(e) = fan_out_presence(&router, &commands, user, status).await {
            warn!(user = %user, status = %status, error = %e, "Presence broadcast failed");
            telemetry::record_error("presence");
        }
    }
    debug!("Presence worker stopped");
}

async fn fan_out_presence(
    router: &Router,
    commands: &mpsc::Sender<Command>,
    user: UserId,
    status: PresenceStatus,
) -> Result<usize, HubError> {
    let peers = router.peers_of(user).await?;
    if peers.is_empty() {
        return Ok(0);
    }

    let payload = codec::encode(&Event::user_status(user, status))?;
    let count = peers.len();
    debug!(user = %user, status = %status, peers = count, "Broadcasting presence");
    telemetry::record_event(EventKind::UserStatus, "outbound");

    commands
        .send(Command::Deliver {
            targets: peers,
            payload,
        })
        .await
        .map_err(|_| HubError::Shutdown)?;
    Ok(count)
}
