//! Event types for the Tryst protocol.
//!
//! An [`Event`] is the unit of wire transport in both directions. Clients
//! send `send_message` and `typing`; the hub emits `new_message`, `typing`
//! and `user_status`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::ProtocolError;
use crate::ids::{MatchId, UserId};
use crate::message::StoredMessage;

/// Event kind, serialized under the `type` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Client request to persist and deliver a chat message.
    SendMessage,
    /// Typing indicator, in either direction.
    Typing,
    /// Presence change of a match peer.
    UserStatus,
    /// A message delivered to its recipient.
    NewMessage,
}

impl EventKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendMessage => "send_message",
            Self::Typing => "typing",
            Self::UserStatus => "user_status",
            Self::NewMessage => "new_message",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence status broadcast to match peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload carried in the `data` field of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventData {
    /// The stored record of a delivered message.
    Message(StoredMessage),
    /// Presence payload: `{"status": "online"}`.
    Status {
        /// New status of the user named by `user_id`.
        status: PresenceStatus,
    },
}

/// A protocol event.
///
/// Events are immutable once constructed. Optional fields are omitted from
/// the JSON encoding when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Target match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<MatchId>,
    /// Text payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Originating user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Creation time. Inbound frames may omit it.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Kind-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EventData>,
}

impl Event {
    fn bare(kind: EventKind) -> Self {
        Self {
            kind,
            match_id: None,
            message: None,
            user_id: None,
            timestamp: Utc::now(),
            data: None,
        }
    }

    /// Create a `user_status` event announcing `user`'s new status.
    #[must_use]
    pub fn user_status(user: UserId, status: PresenceStatus) -> Self {
        Self {
            user_id: Some(user),
            data: Some(EventData::Status { status }),
            ..Self::bare(EventKind::UserStatus)
        }
    }

    /// Create a `new_message` event carrying a stored record.
    ///
    /// The event timestamp is the record's creation time.
    #[must_use]
    pub fn new_message(stored: &StoredMessage) -> Self {
        Self {
            kind: EventKind::NewMessage,
            match_id: Some(stored.match_id),
            message: Some(stored.message.clone()),
            user_id: Some(stored.sender_id),
            timestamp: stored.created_at,
            data: Some(EventData::Message(stored.clone())),
        }
    }

    /// Create a `typing` event sent by `user` in `match_id`.
    #[must_use]
    pub fn typing(match_id: MatchId, user: UserId) -> Self {
        Self {
            match_id: Some(match_id),
            user_id: Some(user),
            ..Self::bare(EventKind::Typing)
        }
    }

    /// Create a client `send_message` request.
    #[must_use]
    pub fn send_message(match_id: MatchId, body: impl Into<String>) -> Self {
        Self {
            match_id: Some(match_id),
            message: Some(body.into()),
            ..Self::bare(EventKind::SendMessage)
        }
    }

    /// Create a client `typing` request.
    #[must_use]
    pub fn typing_request(match_id: MatchId) -> Self {
        Self {
            match_id: Some(match_id),
            ..Self::bare(EventKind::Typing)
        }
    }

    /// Presence status carried by a `user_status` event.
    #[must_use]
    pub fn status(&self) -> Option<PresenceStatus> {
        match &self.data {
            Some(EventData::Status { status }) => Some(*status),
            _ => None,
        }
    }

    /// Stored record carried by a `new_message` event.
    #[must_use]
    pub fn stored_message(&self) -> Option<&StoredMessage> {
        match &self.data {
            Some(EventData::Message(stored)) => Some(stored),
            _ => None,
        }
    }

    /// Validate a client event and convert it into an [`Inbound`] request.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is missing, the body is blank,
    /// or the kind is one only the hub may emit.
    pub fn into_inbound(self) -> Result<Inbound, ProtocolError> {
        match self.kind {
            EventKind::SendMessage => {
                let match_id = self.match_id.ok_or(ProtocolError::MissingField("match_id"))?;
                let body = self.message.ok_or(ProtocolError::MissingField("message"))?;
                if body.trim().is_empty() {
                    return Err(ProtocolError::EmptyMessage);
                }
                Ok(Inbound::SendMessage { match_id, body })
            }
            EventKind::Typing => {
                let match_id = self.match_id.ok_or(ProtocolError::MissingField("match_id"))?;
                Ok(Inbound::Typing { match_id })
            }
            kind => Err(ProtocolError::UnexpectedKind(kind)),
        }
    }
}

/// A validated client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Persist `body` in `match_id` and deliver it to the match peer.
    SendMessage { match_id: MatchId, body: String },
    /// Tell the match peer the sender is typing.
    Typing { match_id: MatchId },
}

impl Inbound {
    /// Kind of the originating event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SendMessage { .. } => EventKind::SendMessage,
            Self::Typing { .. } => EventKind::Typing,
        }
    }

    /// Match the request targets.
    #[must_use]
    pub fn match_id(&self) -> MatchId {
        match self {
            Self::SendMessage { match_id, .. } | Self::Typing { match_id } => *match_id,
        }
    }
}
