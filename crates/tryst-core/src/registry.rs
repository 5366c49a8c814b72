//! Connection registry.
//!
//! Maps each online user to its single active [`ConnectionHandle`]. The
//! registry is owned by the hub's coordinating task and is never shared, so
//! it needs no locking: every mutation arrives as a command.

use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace};
use tryst_protocol::UserId;
use tryst_transport::ConnectionId;

/// Registry record for one live connection.
///
/// The handle owns the only sender of the connection's outbound queue, so
/// dropping the handle closes the queue and lets the write pump finish.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user: UserId,
    outbound: mpsc::Sender<Bytes>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end of its bounded outbound queue.
    #[must_use]
    pub fn new(id: ConnectionId, user: UserId, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        (Self { id, user, outbound }, rx)
    }

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
}

/// Result of a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Queued for the recipient's write pump.
    Enqueued,
    /// Recipient not registered; event dropped.
    Offline,
    /// Recipient queue was full; event dropped and recipient removed.
    Evicted,
    /// Recipient's write pump is already gone; event dropped and the stale
    /// registration removed.
    Disconnected,
}

impl DeliveryOutcome {
    /// Whether the recipient lost its registration as a side effect.
    #[must_use]
    pub fn removed_recipient(&self) -> bool {
        matches!(self, Self::Evicted | Self::Disconnected)
    }
}

/// User to connection mapping. At most one handle per user.
#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<UserId, ConnectionHandle>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handle, replacing any handle already registered for the
    /// same user. The replaced handle is returned; dropping it closes its
    /// queue.
    pub fn register(&mut self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let replaced = self.connections.insert(handle.user, handle);
        if let Some(old) = &replaced {
            debug!(user = %old.user, connection = %old.id, "Replacing existing connection");
        }
        replaced
    }

    /// Remove the registration of `user`, but only if it is still the
    /// connection `id`. A stale request for a replaced connection is a no-op.
    pub fn unregister(&mut self, user: UserId, id: ConnectionId) -> Option<ConnectionHandle> {
        match self.connections.get(&user) {
            Some(current) if current.id == id => self.connections.remove(&user),
            Some(current) => {
                trace!(
                    user = %user,
                    stale = %id,
                    current = %current.id,
                    "Ignoring unregister for replaced connection"
                );
                None
            }
            None => None,
        }
    }

    /// Remove whatever connection `user` has.
    pub fn remove(&mut self, user: UserId) -> Option<ConnectionHandle> {
        self.connections.remove(&user)
    }

    /// Try to enqueue `payload` for `user` without waiting.
    ///
    /// A full queue means the consumer is stalled: the event is dropped and
    /// the connection evicted.
    pub fn deliver(&mut self, user: UserId, payload: Bytes) -> DeliveryOutcome {
        let Some(handle) = self.connections.get(&user) else {
            return DeliveryOutcome::Offline;
        };

        match handle.outbound.try_send(payload) {
            Ok(()) => DeliveryOutcome::Enqueued,
            Err(TrySendError::Full(_)) => {
                self.connections.remove(&user);
                DeliveryOutcome::Evicted
            }
            Err(TrySendError::Closed(_)) => {
                self.connections.remove(&user);
                DeliveryOutcome::Disconnected
            }
        }
    }

    /// Current connection of `user`.
    #[must_use]
    pub fn get(&self, user: UserId) -> Option<&ConnectionHandle> {
        self.connections.get(&user)
    }

    /// Check if `user` is registered.
    #[must_use]
    pub fn contains(&self, user: UserId) -> bool {
        self.connections.contains_key(&user)
    }

    /// Registered users.
    #[must_use]
    pub fn users(&self) -> Vec<UserId> {
        self.connections.keys().copied().collect()
    }

    /// Number of registered users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if nobody is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(user: UserId, capacity: usize) -> (ConnectionHandle, mpsc::Receiver<Bytes>) {
        ConnectionHandle::new(ConnectionId::generate(), user, capacity)
    }

    #[test]
    fn test_register_replaces_and_closes_old_queue() {
        let mut registry = Registry::new();
        let user = UserId::new_v4();

        let (first, mut first_rx) = handle(user, 4);
        let (second, _second_rx) = handle(user, 4);
        let second_id = second.id();

        assert!(registry.register(first).is_none());
        let replaced = registry.register(second).expect("first handle replaced");
        drop(replaced);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(user).map(|h| h.id()), Some(second_id));
        // Old queue is closed once its handle is dropped
        assert!(matches!(
            first_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_stale_unregister_is_noop() {
        let mut registry = Registry::new();
        let user = UserId::new_v4();

        let (first, _rx1) = handle(user, 4);
        let first_id = first.id();
        let (second, _rx2) = handle(user, 4);
        let second_id = second.id();

        registry.register(first);
        registry.register(second);

        assert!(registry.unregister(user, first_id).is_none());
        assert!(registry.contains(user));

        assert!(registry.unregister(user, second_id).is_some());
        assert!(!registry.contains(user));
        // Twice is harmless
        assert!(registry.unregister(user, second_id).is_none());
    }

    #[test]
    fn test_deliver_enqueues_in_order() {
        let mut registry = Registry::new();
        let user = UserId::new_v4();
        let (h, mut rx) = handle(user, 4);
        registry.register(h);

        assert_eq!(
            registry.deliver(user, Bytes::from_static(b"1")),
            DeliveryOutcome::Enqueued
        );
        assert_eq!(
            registry.deliver(user, Bytes::from_static(b"2")),
            DeliveryOutcome::Enqueued
        );
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"1"));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"2"));
    }

    #[test]
    fn test_deliver_to_offline_user() {
        let mut registry = Registry::new();
        assert_eq!(
            registry.deliver(UserId::new_v4(), Bytes::from_static(b"x")),
            DeliveryOutcome::Offline
        );
    }

    #[test]
    fn test_full_queue_evicts() {
        let mut registry = Registry::new();
        let user = UserId::new_v4();
        let (h, mut rx) = handle(user, 1);
        registry.register(h);

        assert_eq!(
            registry.deliver(user, Bytes::from_static(b"fits")),
            DeliveryOutcome::Enqueued
        );
        let outcome = registry.deliver(user, Bytes::from_static(b"overflow"));
        assert_eq!(outcome, DeliveryOutcome::Evicted);
        assert!(outcome.removed_recipient());
        assert!(!registry.contains(user));

        // The queued event is still drained, then the queue reports closed
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"fits"));
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_deliver_to_dead_consumer() {
        let mut registry = Registry::new();
        let user = UserId::new_v4();
        let (h, rx) = handle(user, 4);
        registry.register(h);
        drop(rx);

        assert_eq!(
            registry.deliver(user, Bytes::from_static(b"x")),
            DeliveryOutcome::Disconnected
        );
        assert!(registry.is_empty());
    }
}
