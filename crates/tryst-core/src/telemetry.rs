//! Metrics instrumentation for the hub.
//!
//! Recorded through the `metrics` facade; the embedding binary decides
//! whether and where they are exported.

use metrics::{counter, gauge};
use tryst_protocol::EventKind;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "tryst_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "tryst_connections_active";
    pub const USERS_ONLINE: &str = "tryst_users_online";
    pub const EVENTS_TOTAL: &str = "tryst_events_total";
    pub const DELIVERIES_DROPPED: &str = "tryst_deliveries_dropped_total";
    pub const EVICTIONS_TOTAL: &str = "tryst_evictions_total";
    pub const ERRORS_TOTAL: &str = "tryst_errors_total";
}

/// Record a newly registered connection.
pub fn record_connection_opened() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a connection whose pumps have both exited.
pub fn record_connection_closed() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Update the number of registered users.
pub fn set_users_online(count: usize) {
    gauge!(names::USERS_ONLINE).set(count as f64);
}

/// Record an event by kind and direction (`inbound` / `outbound`).
pub fn record_event(kind: EventKind, direction: &'static str) {
    counter!(names::EVENTS_TOTAL, "kind" => kind.as_str(), "direction" => direction).increment(1);
}

/// Record a dropped delivery.
pub fn record_drop(reason: &'static str) {
    counter!(names::DELIVERIES_DROPPED, "reason" => reason).increment(1);
}

/// Record a forced eviction of an unresponsive connection.
pub fn record_eviction() {
    counter!(names::EVICTIONS_TOTAL).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}
