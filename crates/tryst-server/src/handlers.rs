//! HTTP and WebSocket handlers for the Tryst server.
//!
//! The WebSocket endpoint authenticates the caller, wraps the upgraded
//! socket in a transport connection and hands it to the hub, which owns it
//! from then on.

use crate::auth::{AuthUser, TokenVerifier};
use crate::config::Config;
use crate::fixtures::Fixtures;
use crate::metrics;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, FromRef, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use tryst_core::{Hub, MemoryStore, MessageStore, SharedStore, StoreError};
use tryst_protocol::{MatchId, UserId};
use tryst_transport::AxumConnection;

/// Shared server state.
pub struct AppState {
    /// The presence and delivery hub.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
    /// Access token verifier.
    pub verifier: TokenVerifier,
}

impl AppState {
    /// Create new app state over `store`. Starts the hub, so this must run
    /// inside a Tokio runtime.
    #[must_use]
    pub fn new(config: Config, store: SharedStore) -> Self {
        let verifier = TokenVerifier::new(
            config.auth.jwt_secret.as_bytes(),
            config.auth.issuer.as_deref(),
        );

        Self {
            hub: Hub::new(store, config.hub_config()),
            config,
            verifier,
        }
    }
}

impl FromRef<Arc<AppState>> for TokenVerifier {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.verifier.clone()
    }
}

/// Build the HTTP router.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/v1/matches", get(matches_handler))
        .route("/api/v1/matches/:match_id/messages", get(messages_handler))
        .with_state(state)
}

/// Serve `state` on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server stops with an I/O error.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = build_app(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    if let Some(path) = &config.store.fixtures {
        Fixtures::load(path)?.seed(&store);
    }

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    if config.uses_dev_secret() {
        warn!("Using the development JWT secret; set auth.jwt_secret");
    }

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Tryst server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    let state = Arc::new(AppState::new(config, store));
    serve(listener, state).await
}

/// Errors returned by the JSON API.
#[derive(Debug)]
enum ApiError {
    Forbidden,
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Forbidden => (StatusCode::FORBIDDEN, "Access denied to this match"),
            Self::Store(e) => {
                error!(error = %e, "Store request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Store unavailable")
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "online": state.hub.online_users().await.len(),
    }))
}

/// Active matches of the caller.
async fn matches_handler(
    AuthUser(claims): AuthUser,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let matches = state.hub.store().matches_of(claims.user_id).await?;
    Ok(Json(serde_json::json!({ "matches": matches })))
}

/// Message history of a match the caller participates in.
async fn messages_handler(
    AuthUser(claims): AuthUser,
    Path(match_id): Path<MatchId>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.hub.store();
    let participates = store
        .matches_of(claims.user_id)
        .await?
        .iter()
        .any(|m| m.id == match_id);
    if !participates {
        return Err(ApiError::Forbidden);
    }

    let messages = store.messages_for_match(match_id).await?;
    Ok(Json(serde_json::json!({
        "messages": messages,
        "match_id": match_id,
    })))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    AuthUser(claims): AuthUser,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let max_message_size = state.config.limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, claims.user_id, remote, state))
}

/// Hand an upgraded socket to the hub and wait for it to close.
async fn handle_websocket(socket: WebSocket, user: UserId, remote: SocketAddr, state: Arc<AppState>) {
    let connection = AxumConnection::new(socket)
        .with_remote_addr(remote)
        .with_max_message_size(state.config.limits.max_message_size);

    match state.hub.register_connection(user, Box::new(connection)).await {
        Ok(session) => {
            debug!(user = %user, connection = %session.id(), "WebSocket connected");
            session.closed().await;
            debug!(user = %user, connection = %session.id(), "WebSocket disconnected");
        }
        Err(e) => {
            error!(user = %user, error = %e, "Failed to register connection");
        }
    }
}
