//! # tryst-core
//!
//! Presence registry, match routing and delivery for the Tryst hub.
//!
//! This crate provides the building blocks behind the realtime endpoint:
//!
//! - **Hub** - single coordinating task owning the registry of online users
//! - **Registry** - one active connection per user, bounded outbound queues
//! - **Router** - resolves match peers through the message store
//! - **Connection** - read/write pumps with deadlines and keepalive
//! - **Store** - the persistence collaborator and an in-memory implementation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Read pump  │────▶│     Hub     │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │                   │
//!        ▼                   ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │    Store    │◀────│   Router    │     │ Write pump  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```

pub mod connection;
pub mod hub;
pub mod registry;
pub mod router;
pub mod store;
pub mod telemetry;

pub use connection::{ConnectionState, DisconnectReason, Session};
pub use hub::{Hub, HubConfig, HubError};
pub use registry::{ConnectionHandle, DeliveryOutcome, Registry};
pub use router::Router;
pub use store::{MatchRelation, MemoryStore, MessageStore, SharedStore, StoreError};
