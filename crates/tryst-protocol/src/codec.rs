//! Codec for encoding and decoding Tryst events.
//!
//! Each WebSocket frame carries exactly one JSON-encoded [`Event`].

use bytes::Bytes;
use thiserror::Error;

use crate::event::{Event, EventKind, Inbound};

/// Maximum encoded frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
///
/// None of these are fatal to a connection: the offending frame is dropped.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds the 64 KiB limit")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A field required by the event kind is absent.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// `send_message` with a blank body.
    #[error("Message body is empty")]
    EmptyMessage,

    /// A kind clients are not allowed to send.
    #[error("Unexpected event kind from client: {0}")]
    UnexpectedKind(EventKind),
}

/// Encode an event to bytes.
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode(event: &Event) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(event)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Decode an event from bytes.
///
/// # Errors
///
/// Returns an error if the data is too large or not a valid event.
pub fn decode(data: &[u8]) -> Result<Event, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    Ok(serde_json::from_slice(data)?)
}

/// Decode and validate a client frame.
///
/// # Errors
///
/// Returns an error if the frame cannot be decoded or fails validation.
pub fn decode_inbound(data: &[u8]) -> Result<Inbound, ProtocolError> {
    decode(data)?.into_inbound()
}
