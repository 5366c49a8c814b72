//! Identifier newtypes shared by every Tryst crate.
//!
//! All identifiers are UUIDs on the wire, serialized as hyphenated strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            #[must_use]
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }

            /// Get the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identity of an authenticated account. Registry key of the hub.
    UserId
);

uuid_id!(
    /// Identity of a match between two users.
    MatchId
);

uuid_id!(
    /// Identity of a persisted chat message.
    MessageId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_serializes_as_plain_string() {
        let id: UserId = "6f1c2a4e-8f0b-4a53-9d1e-0c7b6a9e2f11".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"6f1c2a4e-8f0b-4a53-9d1e-0c7b6a9e2f11\"");
        assert_eq!(id.to_string(), "6f1c2a4e-8f0b-4a53-9d1e-0c7b6a9e2f11");
    }

    #[test]
    fn test_invalid_id_rejected() {
        assert!("not-a-uuid".parse::<MatchId>().is_err());
    }
}
