//! Agent registry HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::agents::registry::{self, AgentFilter};
use crate::agents::runs::{self, RunFilter, RunStats, DEFAULT_STATS_DAYS};
use crate::agents::types::{Agent, AgentRun, AgentStatus, NewAgent, TriggerType};
use crate::agents::{execute_agent_run, proposals};
use crate::api::auth::Caller;
use crate::api::AppState;
use crate::db::audit::{self, AuditEntry};
use crate::error::{AppError, AppResult};
use crate::events::AgentEventKind;
use crate::scheduler::{cron_expr, route_event};

/// List agents, optionally filtered by status and cluster
pub async fn list_agents(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<AgentFilter>,
) -> AppResult<Json<Vec<Agent>>> {
    Ok(Json(registry::list_agents(&state.services.db, &filter).await?))
}

pub async fn create_agent(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(new): Json<NewAgent>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let db = &state.services.db;
    let agent = registry::register_agent(db, new, Utc::now()).await?;
    audit::record(
        db,
        AuditEntry {
            action: "agent.registered",
            entity_type: "agent_registry",
            entity_id: Some(&agent.agent_id),
            actor_profile_id: caller.profile_id(),
            metadata: json!({"cluster": agent.cluster, "status": agent.status}),
        },
        Utc::now(),
    )
    .await;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "data": agent }))))
}

#[derive(Serialize)]
pub struct AgentDetail {
    #[serde(flatten)]
    agent: Agent,
    next_run_at: Option<DateTime<Utc>>,
}

pub async fn get_agent(State(state): State<Arc<AppState>>, Path(agent_id): Path<String>) -> AppResult<Json<AgentDetail>> {
    let agent = registry::get_agent(&state.services.db, &agent_id)
        .await?
        .ok_or_else(|| AppError::agent_not_found(&agent_id))?;
    let next_run_at = match (&agent.status, agent.schedule_cron.as_deref()) {
        (AgentStatus::Active, Some(expr)) => cron_expr::next_due_after(expr, Utc::now()),
        _ => None,
    };
    Ok(Json(AgentDetail { agent, next_run_at }))
}

#[derive(Deserialize)]
pub struct StatusRequest {
    status: AgentStatus,
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(agent_id): Path<String>,
    Json(req): Json<StatusRequest>,
) -> AppResult<Json<Value>> {
    let services = &state.services;
    let previous = registry::get_agent(&services.db, &agent_id)
        .await?
        .ok_or_else(|| AppError::agent_not_found(&agent_id))?;

    registry::update_agent_status(&services.db, &agent_id, req.status, Utc::now()).await?;
    services.events.emit_kind(
        AgentEventKind::AgentStatusChanged {
            agent_id: agent_id.clone(),
            status: req.status,
        },
        "api",
    );
    audit::record(
        &services.db,
        AuditEntry {
            action: "agent.status_changed",
            entity_type: "agent_registry",
            entity_id: Some(&agent_id),
            actor_profile_id: caller.profile_id(),
            metadata: json!({"from": previous.status, "to": req.status}),
        },
        Utc::now(),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "data": { "agentId": agent_id, "status": req.status },
    })))
}

pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(agent_id): Path<String>,
    Json(patch): Json<Value>,
) -> AppResult<Json<Value>> {
    let db = &state.services.db;
    if !registry::update_agent_config(db, &agent_id, &patch, Utc::now()).await? {
        return Err(AppError::agent_not_found(&agent_id));
    }
    audit::record(
        db,
        AuditEntry {
            action: "agent.config_updated",
            entity_type: "agent_registry",
            entity_id: Some(&agent_id),
            actor_profile_id: caller.profile_id(),
            metadata: json!({ "patch": patch }),
        },
        Utc::now(),
    )
    .await;

    let agent = registry::get_agent(db, &agent_id)
        .await?
        .ok_or_else(|| AppError::agent_not_found(&agent_id))?;
    Ok(Json(json!({ "success": true, "data": agent })))
}

#[derive(Deserialize)]
pub struct ScheduleRequest {
    schedule_cron: Option<String>,
}

pub async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(agent_id): Path<String>,
    Json(req): Json<ScheduleRequest>,
) -> AppResult<Json<Value>> {
    let db = &state.services.db;
    if !registry::update_agent_schedule(db, &agent_id, req.schedule_cron.as_deref(), Utc::now()).await? {
        return Err(AppError::agent_not_found(&agent_id));
    }
    audit::record(
        db,
        AuditEntry {
            action: "agent.schedule_updated",
            entity_type: "agent_registry",
            entity_id: Some(&agent_id),
            actor_profile_id: caller.profile_id(),
            metadata: json!({ "schedule_cron": req.schedule_cron }),
        },
        Utc::now(),
    )
    .await;

    let agent = registry::get_agent(db, &agent_id)
        .await?
        .ok_or_else(|| AppError::agent_not_found(&agent_id))?;
    Ok(Json(json!({ "success": true, "data": agent })))
}

/// Run an agent now. Disabled agents are refused; a failed run is a 500.
pub async fn trigger(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(agent_id): Path<String>,
) -> AppResult<Json<Value>> {
    let services = &state.services;
    let agent = registry::get_agent(&services.db, &agent_id)
        .await?
        .ok_or_else(|| AppError::agent_not_found(&agent_id))?;
    if agent.status == AgentStatus::Disabled {
        return Err(AppError::invalid_state(format!("Agent \"{}\" is disabled", agent_id)));
    }

    audit::record(
        &services.db,
        AuditEntry {
            action: "agent.manual_trigger",
            entity_type: "agent_registry",
            entity_id: Some(&agent_id),
            actor_profile_id: caller.profile_id(),
            metadata: json!({}),
        },
        Utc::now(),
    )
    .await;

    let source = format!("user:{}", caller.reviewer());
    let outcome = execute_agent_run(services, &agent_id, TriggerType::Manual, Some(&source))
        .await
        .map_err(|e| AppError::unknown(format!("Agent run failed: {}", e.message)))?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "agentId": agent_id,
            "status": outcome.status,
            "proposalsCreated": outcome.proposals_created,
            "tokensUsed": outcome.tokens_used,
            "summary": outcome.summary,
        },
    })))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsHealth {
    status: &'static str,
    message: &'static str,
    openai: bool,
    recent_success: bool,
    has_active_agents: bool,
    last_updated: DateTime<Utc>,
}

pub async fn health(State(state): State<Arc<AppState>>) -> AppResult<Json<AgentsHealth>> {
    let services = &state.services;
    let now = Utc::now();
    let openai = services.llm.is_configured();
    let recent_success = runs::has_recent_success(&services.db, now - Duration::hours(24)).await?;
    let active = AgentFilter {
        status: Some(AgentStatus::Active),
        cluster: None,
    };
    let has_active_agents = !registry::list_agents(&services.db, &active).await?.is_empty();

    let (status, message) = if openai && recent_success && has_active_agents {
        ("healthy", "Agent system fully operational")
    } else if !openai {
        ("degraded", "OpenAI API not configured")
    } else if !has_active_agents {
        ("degraded", "No active agents configured")
    } else {
        ("degraded", "No recent successful agent runs")
    };

    Ok(Json(AgentsHealth {
        status,
        message,
        openai,
        recent_success,
        has_active_agents,
        last_updated: now,
    }))
}

#[derive(Deserialize)]
pub struct StatsQuery {
    agent_id: Option<String>,
    days: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStats {
    runs: RunStats,
    proposals: BTreeMap<String, i64>,
}

pub async fn stats(State(state): State<Arc<AppState>>, Query(query): Query<StatsQuery>) -> AppResult<Json<AgentStats>> {
    let db = &state.services.db;
    let agent_id = query.agent_id.as_deref();
    let days = query.days.unwrap_or(DEFAULT_STATS_DAYS);
    Ok(Json(AgentStats {
        runs: runs::run_stats(db, agent_id, days, Utc::now()).await?,
        proposals: proposals::proposal_stats(db, agent_id).await?,
    }))
}

/// Seven-day chart data for the dashboard
pub async fn charts(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let charts = runs::dashboard_charts(&state.services.db, Utc::now()).await?;
    Ok(Json(json!({ "success": true, "data": charts })))
}

pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<RunFilter>,
) -> AppResult<Json<Vec<AgentRun>>> {
    Ok(Json(runs::list_runs(&state.services.db, &filter).await?))
}

#[derive(Deserialize)]
pub struct EventRequest {
    event: Option<String>,
    #[serde(default)]
    payload: Value,
}

/// Route a business event to its listening agents
pub async fn post_event(State(state): State<Arc<AppState>>, Json(req): Json<EventRequest>) -> AppResult<Json<Value>> {
    let event = req.event.unwrap_or_default();
    let report = route_event(&state.services, &event, &req.payload).await?;
    Ok(Json(serde_json::to_value(report)?))
}
