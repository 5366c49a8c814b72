//! # tryst-protocol
//!
//! Wire protocol definitions for the Tryst presence and messaging hub.
//!
//! Every WebSocket frame carries one JSON [`Event`]:
//!
//! - `send_message` / `typing` - client requests
//! - `new_message` - a persisted message delivered to its recipient
//! - `typing` - typing indicator relayed to the match peer
//! - `user_status` - a match peer went online or offline
//!
//! ## Example
//!
//! ```rust
//! use tryst_protocol::{codec, Event, Inbound, MatchId};
//!
//! let match_id = MatchId::new_v4();
//! let frame = codec::encode(&Event::send_message(match_id, "hi")).unwrap();
//!
//! let inbound = codec::decode_inbound(&frame).unwrap();
//! assert_eq!(inbound, Inbound::SendMessage { match_id, body: "hi".into() });
//! ```

pub mod codec;
pub mod event;
pub mod ids;
pub mod message;

pub use codec::{decode, decode_inbound, encode, ProtocolError};
pub use event::{Event, EventData, EventKind, Inbound, PresenceStatus};
pub use ids::{MatchId, MessageId, UserId};
pub use message::StoredMessage;
