//! # tryst-transport
//!
//! Transport abstraction layer for the Tryst hub.
//!
//! - **WebSocket** - an upgraded `axum` socket ([`AxumConnection`])
//! - **Memory** - an in-process loopback pair for tests and tooling
//!
//! ## Transport Abstraction
//!
//! Transports implement [`Connection`], which splits into a [`FrameSource`]
//! and a [`FrameSink`] so reads and writes can run on separate tasks.
//!
//! ```rust,ignore
//! use tryst_transport::{Connection, Incoming};
//!
//! async fn drain(conn: Box<dyn Connection>) {
//!     let (_sink, mut source) = conn.split();
//!     while let Ok(Some(Incoming::Frame(frame))) = source.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connection, ConnectionId, FrameSink, FrameSource, Incoming, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::AxumConnection;
