//! Delivery target resolution.
//!
//! The router turns "the other side of match M" and "every match peer of
//! user U" into concrete user ids by querying the store. It holds no mutable
//! state of its own.

use crate::store::{SharedStore, StoreError};
use tracing::trace;
use tryst_protocol::{MatchId, UserId};

/// Resolves delivery targets from match membership.
#[derive(Clone)]
pub struct Router {
    store: SharedStore,
}

impl Router {
    /// Create a router over a store.
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Every user `user` has an active match with, without duplicates,
    /// most recent match first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn peers_of(&self, user: UserId) -> Result<Vec<UserId>, StoreError> {
        let matches = self.store.matches_of(user).await?;

        let mut peers = Vec::with_capacity(matches.len());
        for peer in matches.iter().filter_map(|m| m.peer_of(user)) {
            if peer != user && !peers.contains(&peer) {
                peers.push(peer);
            }
        }

        trace!(user = %user, peers = peers.len(), "Resolved match peers");
        Ok(peers)
    }

    /// The other participant of `match_id`, or `None` if `user` has no
    /// active match with that id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn peer_in_match(
        &self,
        user: UserId,
        match_id: MatchId,
    ) -> Result<Option<UserId>, StoreError> {
        let matches = self.store.matches_of(user).await?;
        Ok(matches
            .iter()
            .find(|m| m.id == match_id)
            .and_then(|m| m.peer_of(user)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MatchRelation, MemoryStore};
    use std::sync::Arc;

    fn fixture() -> (Arc<MemoryStore>, UserId, UserId, UserId, MatchId) {
        let store = Arc::new(MemoryStore::new());
        let (a, b, c) = (UserId::new_v4(), UserId::new_v4(), UserId::new_v4());
        let ab = MatchId::new_v4();
        store.add_match(MatchRelation::new(ab, a, b));
        store.add_match(MatchRelation::new(MatchId::new_v4(), c, a));
        (store, a, b, c, ab)
    }

    #[tokio::test]
    async fn test_peers_of() {
        let (store, a, b, c, _) = fixture();
        let router = Router::new(store);

        let mut peers = router.peers_of(a).await.unwrap();
        peers.sort();
        let mut expected = vec![b, c];
        expected.sort();
        assert_eq!(peers, expected);

        assert_eq!(router.peers_of(b).await.unwrap(), vec![a]);
        assert!(router.peers_of(UserId::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_peers_deduplicated() {
        let (store, a, b, _, _) = fixture();
        store.add_match(MatchRelation::new(MatchId::new_v4(), b, a));
        let router = Router::new(store);

        let peers = router.peers_of(b).await.unwrap();
        assert_eq!(peers, vec![a]);
    }

    #[tokio::test]
    async fn test_peer_in_match() {
        let (store, a, b, c, ab) = fixture();
        let router = Router::new(store);

        assert_eq!(router.peer_in_match(a, ab).await.unwrap(), Some(b));
        assert_eq!(router.peer_in_match(b, ab).await.unwrap(), Some(a));
        // c has a match with a, but not this one
        assert_eq!(router.peer_in_match(c, ab).await.unwrap(), None);
    }
}
