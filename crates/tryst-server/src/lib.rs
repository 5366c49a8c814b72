//! # tryst-server
//!
//! HTTP and WebSocket front end for the Tryst hub: token authentication,
//! the realtime endpoint, message history and health.

pub mod auth;
pub mod config;
pub mod fixtures;
pub mod handlers;
pub mod metrics;
