//! # Tryst Server
//!
//! Realtime presence and message delivery for matched users.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! tryst
//!
//! # Run with a config file in the working directory
//! cp tryst.example.toml tryst.toml && tryst
//!
//! # Run with environment variables
//! TRYST_PORT=8080 TRYST_HOST=0.0.0.0 TRYST_AUTH__JWT_SECRET=... tryst
//! ```

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tryst_server::{config, handlers, metrics};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tryst=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Tryst server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
