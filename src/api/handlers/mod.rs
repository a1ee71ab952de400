//! HTTP request handlers

pub mod agents;
pub mod cron;
pub mod proposals;

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use super::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    database: bool,
}

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let database = state.services.db.ping().await;
    Json(HealthResponse {
        status: if database { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
    })
}
