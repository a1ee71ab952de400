//! Proposal review HTTP handlers

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::agents::appliers::apply_proposal;
use crate::agents::proposals::{self, BulkResolveFilter, ProposalFilter, ProposalPage};
use crate::agents::types::{Proposal, ProposalStatus};
use crate::api::auth::Caller;
use crate::api::AppState;
use crate::db::audit::{self, AuditEntry};
use crate::error::{AppError, AppResult};
use crate::events::AgentEventKind;

const EVENT_SOURCE: &str = "api";

pub async fn list_proposals(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ProposalFilter>,
) -> AppResult<Json<ProposalPage>> {
    Ok(Json(proposals::list_proposals(&state.services.db, &filter).await?))
}

#[derive(Deserialize)]
pub struct StatsQuery {
    agent_id: Option<String>,
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> AppResult<Json<BTreeMap<String, i64>>> {
    Ok(Json(
        proposals::proposal_stats(&state.services.db, query.agent_id.as_deref()).await?,
    ))
}

pub async fn get_proposal(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> AppResult<Json<Proposal>> {
    proposals::get_proposal(&state.services.db, &id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("Proposal \"{}\" not found", id)))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Reject,
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    action: ReviewAction,
    notes: Option<String>,
}

/// Approve or reject a pending proposal. Approval applies it immediately.
pub async fn review(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    Json(req): Json<ReviewRequest>,
) -> AppResult<Json<Value>> {
    let services = &state.services;
    let proposal = proposals::get_proposal(&services.db, &id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Proposal \"{}\" not found", id)))?;
    if proposal.status != ProposalStatus::Pending {
        return Err(AppError::invalid_state(format!("Proposal is already {}", proposal.status)));
    }

    let reviewer = caller.reviewer();
    let now = Utc::now();
    let (changed, status) = match req.action {
        ReviewAction::Approve => (
            proposals::approve(&services.db, &id, &reviewer, req.notes.as_deref(), now).await?,
            ProposalStatus::Approved,
        ),
        ReviewAction::Reject => (
            proposals::reject(&services.db, &id, &reviewer, req.notes.as_deref(), now).await?,
            ProposalStatus::Rejected,
        ),
    };
    // Lost a race with another reviewer or the expiry sweep
    if !changed {
        return Err(AppError::invalid_state("Proposal is no longer pending"));
    }

    audit::record(
        &services.db,
        AuditEntry {
            action: match req.action {
                ReviewAction::Approve => "proposal.approved",
                ReviewAction::Reject => "proposal.rejected",
            },
            entity_type: "agent_proposals",
            entity_id: Some(&id),
            actor_profile_id: caller.profile_id(),
            metadata: json!({
                "agent_id": proposal.agent_id,
                "proposal_type": proposal.proposal_type,
                "notes": req.notes,
            }),
        },
        now,
    )
    .await;
    services.events.emit_kind(
        AgentEventKind::ProposalReviewed {
            proposal_id: id.clone(),
            status,
            reviewer: Some(reviewer),
        },
        EVENT_SOURCE,
    );

    let applied = match req.action {
        ReviewAction::Approve => apply_proposal(services, &id).await?,
        ReviewAction::Reject => false,
    };
    let status = if applied { ProposalStatus::Applied } else { status };

    Ok(Json(json!({
        "success": true,
        "data": {
            "proposalId": id,
            "action": req.action,
            "status": status,
            "applied": applied,
        },
    })))
}

#[derive(Deserialize, Default)]
pub struct ResolveRequest {
    notes: Option<String>,
}

/// Mark a proposal handled outside the system
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    body: Option<Json<ResolveRequest>>,
) -> AppResult<Json<Value>> {
    let services = &state.services;
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let proposal = proposals::get_proposal(&services.db, &id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Proposal \"{}\" not found", id)))?;

    let now = Utc::now();
    if !proposals::resolve(&services.db, &id, &caller.reviewer(), req.notes.as_deref(), now).await? {
        return Err(AppError::invalid_state(format!("Proposal is already {}", proposal.status)));
    }

    audit::record(
        &services.db,
        AuditEntry {
            action: "proposal.resolved",
            entity_type: "agent_proposals",
            entity_id: Some(&id),
            actor_profile_id: caller.profile_id(),
            metadata: json!({ "from": proposal.status, "notes": req.notes }),
        },
        now,
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "data": { "proposalId": id, "status": ProposalStatus::Applied },
    })))
}

pub async fn bulk_resolve(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    body: Option<Json<BulkResolveFilter>>,
) -> AppResult<Json<Value>> {
    let services = &state.services;
    let filter = body.map(|Json(filter)| filter).unwrap_or_default();
    let now = Utc::now();
    let resolved = proposals::bulk_resolve(&services.db, &caller.reviewer(), &filter, now).await?;

    audit::record(
        &services.db,
        AuditEntry {
            action: "proposal.bulk_resolved",
            entity_type: "agent_proposals",
            entity_id: None,
            actor_profile_id: caller.profile_id(),
            metadata: json!({
                "agent_id": filter.agent_id,
                "status": filter.status,
                "count": resolved,
            }),
        },
        now,
    )
    .await;

    Ok(Json(json!({ "success": true, "data": { "resolved": resolved } })))
}
