//! HTTP server hosting the control-channel WebSocket endpoint.
//!
//! Routes:
//! - `GET /health` — plain-text liveness probe.
//! - `GET /cpu-stress` — WebSocket upgrade; each connection runs one
//!   [`Session`].

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::session::{Session, Transport};
use crate::{AppError, Result};

/// State shared by all connections.
pub struct AppState {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// Cancelled when the agent shuts down; ends every session.
    pub shutdown: CancellationToken,
}

/// Handler for `GET /health`.
async fn health() -> &'static str {
    "ok"
}

/// Handler for `GET /cpu-stress`.
async fn cpu_stress(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.max_message_size(state.config.max_message_bytes)
        .on_failed_upgrade(|err| warn!(%err, "websocket upgrade failed"))
        .on_upgrade(move |socket| {
            let session = Session::new(
                Transport::from_websocket(socket),
                &state.config,
                state.shutdown.child_token(),
            );
            session.run()
        })
}

/// Build the agent's router.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cpu-stress", get(cpu_stress))
        .with_state(state)
}

/// Bind the configured listen address.
///
/// # Errors
///
/// Returns `AppError::Config` if the address cannot be bound.
pub async fn bind(config: &GlobalConfig) -> Result<TcpListener> {
    let address = config.listen_address();
    TcpListener::bind(&address)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind {address}: {err}")))
}

/// Serve the agent on `listener` until `state.shutdown` fires.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let local = listener.local_addr()?;
    let shutdown = state.shutdown.clone();
    info!(address = %local, "agent listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("server failed: {err}")))
}
