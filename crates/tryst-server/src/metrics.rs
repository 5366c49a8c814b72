//! Metrics export for the Tryst server.
//!
//! The hub records through the `metrics` facade (see
//! [`tryst_core::telemetry`]); this module describes those metrics and
//! exports them in Prometheus format.

use anyhow::{Context, Result};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tryst_core::telemetry::names as hub;

/// Metric names owned by the server.
pub mod names {
    pub const AUTH_FAILURES_TOTAL: &str = "tryst_auth_failures_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        hub::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        hub::CONNECTIONS_ACTIVE,
        "Current number of connections with running pumps"
    );
    metrics::describe_gauge!(hub::USERS_ONLINE, "Current number of registered users");
    metrics::describe_counter!(hub::EVENTS_TOTAL, "Events handled, by kind and direction");
    metrics::describe_counter!(
        hub::DELIVERIES_DROPPED,
        "Events dropped before reaching a recipient, by reason"
    );
    metrics::describe_counter!(
        hub::EVICTIONS_TOTAL,
        "Connections evicted because their outbound queue was full"
    );
    metrics::describe_counter!(hub::ERRORS_TOTAL, "Total number of errors");
    metrics::describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Requests rejected for a missing or invalid token"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a rejected token.
pub fn record_auth_failure() {
    counter!(names::AUTH_FAILURES_TOTAL).increment(1);
}
