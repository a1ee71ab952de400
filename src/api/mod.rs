//! HTTP API server module
//!
//! REST endpoints for administering agents and reviewing proposals, cron
//! endpoints for an external scheduler, and a WebSocket event stream.

pub mod auth;
pub mod handlers;
mod routes;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{AppError, AppResult};
use crate::services::Services;

pub use routes::create_router;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

/// Router with CORS and request tracing applied
pub fn create_app(state: Arc<AppState>) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    create_router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
}

/// Start the HTTP API server and serve until the process exits
///
/// SECURITY: binding to 0.0.0.0 exposes the admin API to the network.
pub async fn start_server(services: Services, addr: SocketAddr) -> AppResult<()> {
    let app = create_app(Arc::new(AppState::new(services)));

    if addr.ip().is_unspecified() {
        tracing::warn!(%addr, "Server binding to all interfaces - accessible from network");
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::config(format!("Failed to bind HTTP server on {}: {}", addr, e)))?;
    tracing::info!("HTTP API server listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::unknown(format!("HTTP server error: {}", e)))
}
