//! Server configuration.
//!
//! Configuration is layered:
//! - Defaults for every field
//! - TOML configuration file (first of `tryst.toml`, `/etc/tryst/tryst.toml`,
//!   `~/.config/tryst/tryst.toml`)
//! - Environment variables (`TRYST_PORT`, `TRYST_HEARTBEAT__READ_TIMEOUT_MS`, ...)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tryst_core::HubConfig;

const CONFIG_PATHS: [&str; 3] = [
    "tryst.toml",
    "/etc/tryst/tryst.toml",
    "~/.config/tryst/tryst.toml",
];

/// Secret used when none is configured. Only fit for local development.
pub const DEV_JWT_SECRET: &str = "tryst-dev-secret";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Keepalive and deadline configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Token verification.
    #[serde(default)]
    pub auth: AuthConfig,

    /// In-memory store configuration.
    #[serde(default)]
    pub store: StoreConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Per-connection outbound queue capacity.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue_capacity: usize,

    /// Hub command queue capacity.
    #[serde(default = "default_command_queue")]
    pub command_queue_capacity: usize,
}

/// Keepalive and deadline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Keepalive probe interval in milliseconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    /// Read deadline in milliseconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Write deadline in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Token verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret shared with the token issuer.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Required `iss` claim, if any.
    #[serde(default)]
    pub issuer: Option<String>,
}

/// In-memory store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// TOML file with matches to seed at startup.
    #[serde(default)]
    pub fixtures: Option<PathBuf>,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_outbound_queue() -> usize {
    256
}

fn default_command_queue() -> usize {
    1024
}

fn default_ping_interval() -> u64 {
    54_000 // 54 seconds
}

fn default_read_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_write_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_jwt_secret() -> String {
    DEV_JWT_SECRET.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            auth: AuthConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            outbound_queue_capacity: default_outbound_queue(),
            command_queue_capacity: default_command_queue(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval(),
            read_timeout_ms: default_read_timeout(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            issuer: None,
        }
    }
}

/// `TRYST_*` environment overlay; `__` separates nested keys.
fn environment() -> ::config::Environment {
    ::config::Environment::with_prefix("TRYST")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl Config {
    /// Load configuration from the first config file found, overlaid with
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// the result is inconsistent.
    pub fn load() -> Result<Self> {
        let file = CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).into_owned()))
            .find(|path| path.exists());

        if let Some(path) = &file {
            tracing::info!("Loading configuration from {}", path.display());
        }

        Self::layered(file.as_deref(), environment())
    }

    fn layered(file: Option<&Path>, env: ::config::Environment) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }

        let config: Config = builder
            .add_source(env)
            .build()
            .and_then(|layers| layers.try_deserialize())
            .context("Failed to assemble configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.ping_interval_ms >= self.heartbeat.read_timeout_ms {
            bail!(
                "heartbeat.ping_interval_ms ({}) must be below heartbeat.read_timeout_ms ({})",
                self.heartbeat.ping_interval_ms,
                self.heartbeat.read_timeout_ms
            );
        }
        if self.limits.outbound_queue_capacity == 0 || self.limits.command_queue_capacity == 0 {
            bail!("queue capacities must be positive");
        }
        if self.auth.jwt_secret.is_empty() {
            bail!("auth.jwt_secret must not be empty");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Hub settings derived from limits and heartbeat.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            outbound_capacity: self.limits.outbound_queue_capacity,
            command_capacity: self.limits.command_queue_capacity,
            keepalive_interval: Duration::from_millis(self.heartbeat.ping_interval_ms),
            read_timeout: Duration::from_millis(self.heartbeat.read_timeout_ms),
            write_timeout: Duration::from_millis(self.heartbeat.write_timeout_ms),
        }
    }

    /// Check if the development secret is still in use.
    #[must_use]
    pub fn uses_dev_secret(&self) -> bool {
        self.auth.jwt_secret == DEV_JWT_SECRET
    }
}
