//! HTTP API route definitions

use axum::{
    middleware,
    routing::{get, patch, post, put},
    Router,
};
use std::sync::Arc;

use super::auth;
use super::handlers::{self, agents, cron, proposals};
use super::ws;
use super::AppState;

/// Create the main API router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        // Auth (the middleware lets /api/auth/* through)
        .route("/api/auth/setup", post(auth::setup))
        .route("/api/auth/me", get(auth::me))
        .route("/api/profiles", post(auth::create_profile_handler))
        // Agents (static routes before dynamic {agent_id} routes)
        .route("/api/agents", get(agents::list_agents).post(agents::create_agent))
        .route("/api/agents/health", get(agents::health))
        .route("/api/agents/stats", get(agents::stats))
        .route("/api/agents/charts", get(agents::charts))
        .route("/api/agents/runs", get(agents::list_runs))
        .route("/api/agents/events", post(agents::post_event))
        // Proposals
        .route("/api/agents/proposals", get(proposals::list_proposals))
        .route("/api/agents/proposals/stats", get(proposals::stats))
        .route("/api/agents/proposals/bulk-resolve", post(proposals::bulk_resolve))
        .route("/api/agents/proposals/{id}", get(proposals::get_proposal))
        .route("/api/agents/proposals/{id}/review", post(proposals::review))
        .route("/api/agents/proposals/{id}/resolve", post(proposals::resolve))
        .route("/api/agents/{agent_id}", get(agents::get_agent))
        .route("/api/agents/{agent_id}/status", post(agents::update_status))
        .route("/api/agents/{agent_id}/config", patch(agents::update_config))
        .route("/api/agents/{agent_id}/schedule", put(agents::update_schedule))
        .route("/api/agents/{agent_id}/trigger", post(agents::trigger))
        // Cron (authenticated by CRON_SECRET inside each handler)
        .route("/api/cron/agent-dispatcher", get(cron::agent_dispatcher))
        .route("/api/cron/agent-budget-reset", get(cron::agent_budget_reset))
        .route("/api/cron/agent-notifications", get(cron::agent_notifications))
        // WebSocket
        .route("/api/ws/agents", get(ws::agent_events_stream))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_middleware))
        .with_state(state)
}
