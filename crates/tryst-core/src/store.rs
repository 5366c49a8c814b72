//! Message store collaborator.
//!
//! The hub never owns users, matches or messages. It reaches them through
//! [`MessageStore`]; [`MemoryStore`] is the in-process implementation used by
//! tests and by the standalone server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use tryst_protocol::{MatchId, StoredMessage, UserId};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The match does not exist or is no longer active.
    #[error("Unknown match: {0}")]
    UnknownMatch(MatchId),

    /// The user is not one of the two participants of the match.
    #[error("User {user} is not a participant of match {match_id}")]
    NotParticipant { user: UserId, match_id: MatchId },

    /// The backing store failed.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A confirmed pairing of two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRelation {
    /// Match identifier.
    pub id: MatchId,
    /// First participant.
    pub user1: UserId,
    /// Second participant.
    pub user2: UserId,
    /// When the match was made.
    pub matched_at: DateTime<Utc>,
    /// Inactive matches are invisible to the hub.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl MatchRelation {
    /// Create an active match made now.
    #[must_use]
    pub fn new(id: MatchId, user1: UserId, user2: UserId) -> Self {
        Self {
            id,
            user1,
            user2,
            matched_at: Utc::now(),
            is_active: true,
        }
    }

    /// Check if a user participates in this match.
    #[must_use]
    pub fn involves(&self, user: UserId) -> bool {
        self.user1 == user || self.user2 == user
    }

    /// The participant that is not `user`, if `user` participates at all.
    #[must_use]
    pub fn peer_of(&self, user: UserId) -> Option<UserId> {
        if self.user1 == user {
            Some(self.user2)
        } else if self.user2 == user {
            Some(self.user1)
        } else {
            None
        }
    }
}

/// Request/response data store consumed by the hub.
///
/// Implementations must tolerate concurrent independent calls.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a text message sent by `sender` in `match_id`.
    async fn persist_message(
        &self,
        match_id: MatchId,
        sender: UserId,
        body: &str,
    ) -> Result<StoredMessage, StoreError>;

    /// Active matches of `user`, most recent first.
    async fn matches_of(&self, user: UserId) -> Result<Vec<MatchRelation>, StoreError>;

    /// Messages of a match, oldest first.
    async fn messages_for_match(&self, match_id: MatchId)
        -> Result<Vec<StoredMessage>, StoreError>;
}

/// Shared handle to a store.
pub type SharedStore = Arc<dyn MessageStore>;

/// In-memory message store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    matches: DashMap<MatchId, MatchRelation>,
    messages: DashMap<MatchId, Vec<StoredMessage>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a match.
    pub fn add_match(&self, relation: MatchRelation) {
        debug!(match_id = %relation.id, user1 = %relation.user1, user2 = %relation.user2, "Adding match");
        self.matches.insert(relation.id, relation);
    }

    /// Mark a match inactive. Returns `false` if it does not exist.
    pub fn deactivate_match(&self, match_id: MatchId) -> bool {
        match self.matches.get_mut(&match_id) {
            Some(mut relation) => {
                relation.is_active = false;
                true
            }
            None => false,
        }
    }

    /// Number of messages stored for a match.
    #[must_use]
    pub fn message_count(&self, match_id: MatchId) -> usize {
        self.messages.get(&match_id).map(|m| m.len()).unwrap_or(0)
    }

    /// Number of matches, active or not.
    #[must_use]
    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    fn active_match(&self, match_id: MatchId) -> Result<MatchRelation, StoreError> {
        self.matches
            .get(&match_id)
            .filter(|m| m.is_active)
            .map(|m| m.value().clone())
            .ok_or(StoreError::UnknownMatch(match_id))
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn persist_message(
        &self,
        match_id: MatchId,
        sender: UserId,
        body: &str,
    ) -> Result<StoredMessage, StoreError> {
        let relation = self.active_match(match_id)?;
        if !relation.involves(sender) {
            return Err(StoreError::NotParticipant {
                user: sender,
                match_id,
            });
        }

        let stored = StoredMessage::text(match_id, sender, body);
        self.messages
            .entry(match_id)
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn matches_of(&self, user: UserId) -> Result<Vec<MatchRelation>, StoreError> {
        let mut matches: Vec<MatchRelation> = self
            .matches
            .iter()
            .filter(|m| m.is_active && m.involves(user))
            .map(|m| m.value().clone())
            .collect();
        matches.sort_by(|a, b| b.matched_at.cmp(&a.matched_at));
        Ok(matches)
    }

    async fn messages_for_match(
        &self,
        match_id: MatchId,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let mut messages = self
            .messages
            .get(&match_id)
            .map(|m| m.value().clone())
            .unwrap_or_default();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_peer_of() {
        let (a, b, c) = (UserId::new_v4(), UserId::new_v4(), UserId::new_v4());
        let relation = MatchRelation::new(MatchId::new_v4(), a, b);

        assert_eq!(relation.peer_of(a), Some(b));
        assert_eq!(relation.peer_of(b), Some(a));
        assert_eq!(relation.peer_of(c), None);
    }

    #[tokio::test]
    async fn test_persist_and_fetch() {
        let store = MemoryStore::new();
        let (a, b) = (UserId::new_v4(), UserId::new_v4());
        let m = MatchId::new_v4();
        store.add_match(MatchRelation::new(m, a, b));

        let first = store.persist_message(m, a, "hi").await.unwrap();
        let second = store.persist_message(m, b, "hey").await.unwrap();
        assert_eq!(first.sender_id, a);

        let history = store.messages_for_match(m).await.unwrap();
        assert_eq!(history, vec![first, second]);
        assert_eq!(store.message_count(m), 2);
    }

    #[tokio::test]
    async fn test_persist_rejects_outsiders_and_unknown_matches() {
        let store = MemoryStore::new();
        let (a, b, c) = (UserId::new_v4(), UserId::new_v4(), UserId::new_v4());
        let m = MatchId::new_v4();
        store.add_match(MatchRelation::new(m, a, b));

        assert!(matches!(
            store.persist_message(m, c, "hi").await,
            Err(StoreError::NotParticipant { .. })
        ));
        assert!(matches!(
            store.persist_message(MatchId::new_v4(), a, "hi").await,
            Err(StoreError::UnknownMatch(_))
        ));
        assert_eq!(store.message_count(m), 0);
    }

    #[tokio::test]
    async fn test_matches_of_orders_and_filters() {
        let store = MemoryStore::new();
        let (a, b, c, d) = (
            UserId::new_v4(),
            UserId::new_v4(),
            UserId::new_v4(),
            UserId::new_v4(),
        );

        let mut older = MatchRelation::new(MatchId::new_v4(), a, b);
        older.matched_at = Utc::now() - Duration::days(2);
        let newer = MatchRelation::new(MatchId::new_v4(), c, a);
        let unrelated = MatchRelation::new(MatchId::new_v4(), c, d);
        store.add_match(older.clone());
        store.add_match(newer.clone());
        store.add_match(unrelated);

        let matches = store.matches_of(a).await.unwrap();
        assert_eq!(matches, vec![newer.clone(), older]);

        store.deactivate_match(newer.id);
        let matches = store.matches_of(a).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches!(
            store.persist_message(newer.id, a, "hi").await,
            Err(StoreError::UnknownMatch(_))
        ));
    }
}
