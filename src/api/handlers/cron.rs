//! Endpoints for an external cron. Each one checks `CRON_SECRET` itself.

use axum::{extract::State, http::HeaderMap, Json};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::auth::require_cron_secret;
use crate::api::AppState;
use crate::error::AppResult;
use crate::scheduler::dispatcher::{self, DispatchReport, NotificationsReport};

pub async fn agent_dispatcher(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Json<DispatchReport>> {
    require_cron_secret(&state.services.config, &headers)?;
    Ok(Json(dispatcher::dispatch(&state.services, Utc::now()).await?))
}

pub async fn agent_budget_reset(State(state): State<Arc<AppState>>, headers: HeaderMap) -> AppResult<Json<Value>> {
    require_cron_secret(&state.services.config, &headers)?;
    let reset = dispatcher::reset_budgets(&state.services, Utc::now()).await?;
    Ok(Json(json!({ "success": true, "agentsReset": reset })))
}

pub async fn agent_notifications(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Json<NotificationsReport>> {
    require_cron_secret(&state.services.config, &headers)?;
    Ok(Json(dispatcher::process_notifications(&state.services, Utc::now()).await?))
}
