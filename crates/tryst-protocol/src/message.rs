//! Persisted chat message record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MatchId, MessageId, UserId};

/// Message type of every message the hub creates.
pub const TEXT_MESSAGE_TYPE: &str = "text";

/// A chat message as stored by the message store.
///
/// The hub creates these through the store and never mutates them afterwards.
/// The record travels to the recipient as the `data` field of a
/// `new_message` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Message identifier.
    pub id: MessageId,
    /// Match the message belongs to.
    pub match_id: MatchId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Message body.
    pub message: String,
    /// Message type, `"text"` for everything sent over the hub.
    pub message_type: String,
    /// Read flag. Stored only, never propagated by the hub.
    #[serde(default)]
    pub is_read: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Create a new unread text message stamped with the current time.
    #[must_use]
    pub fn text(match_id: MatchId, sender_id: UserId, body: impl Into<String>) -> Self {
        Self {
            id: MessageId::new_v4(),
            match_id,
            sender_id,
            message: body.into(),
            message_type: TEXT_MESSAGE_TYPE.to_string(),
            is_read: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message_defaults() {
        let msg = StoredMessage::text(MatchId::new_v4(), UserId::new_v4(), "hi");
        assert_eq!(msg.message, "hi");
        assert_eq!(msg.message_type, "text");
        assert!(!msg.is_read);
    }

    #[test]
    fn test_missing_read_flag_defaults_to_unread() {
        let json = r#"{
            "id": "0d4c8e43-3f5e-4b6a-9a55-2f4f3f0b7c01",
            "match_id": "6a0e6f7c-1c2b-4d8e-8f9a-0b1c2d3e4f50",
            "sender_id": "9b8a7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d",
            "message": "hello",
            "message_type": "text",
            "created_at": "2024-03-01T12:00:00Z"
        }"#;
        let msg: StoredMessage = serde_json::from_str(json).unwrap();
        assert!(!msg.is_read);
        assert_eq!(msg.message, "hello");
    }
}
