//! Proposal store over `agent_proposals`
//!
//! Agents never act directly: they write proposals here, which the supervisor
//! or a human then approves, rejects, or resolves. Every transition is guarded
//! by the expected current status and reports whether a row changed.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite};
use ts_rs::TS;

use super::types::{NewProposal, Proposal, ProposalStatus};
use crate::db::Database;
use crate::error::{AppError, AppResult};

/// Default page size for proposal listings
pub const DEFAULT_PROPOSAL_LIMIT: i64 = 50;

const AUTO_APPROVE_NOTE: &str = "Auto-approved (low risk)";
const RESOLVE_NOTE: &str = "Resolved by admin";
const BULK_RESOLVE_NOTE: &str = "Bulk resolved by admin";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProposalFilter {
    pub agent_id: Option<String>,
    pub status: Option<ProposalStatus>,
    pub proposal_type: Option<String>,
    pub target_employee_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkResolveFilter {
    pub agent_id: Option<String>,
    pub status: Option<ProposalStatus>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "agents/")]
pub struct ProposalPage {
    pub proposals: Vec<Proposal>,
    #[ts(type = "number")]
    pub total: i64,
}

pub async fn create_proposal(db: &Database, input: NewProposal, now: DateTime<Utc>) -> AppResult<String> {
    if input.title.trim().is_empty() {
        return Err(AppError::invalid_params("proposal title is required"));
    }
    let id = uuid::Uuid::new_v4().to_string();
    let expires_at = input.expires_in_hours.map(|h| now + Duration::hours(h));
    let detail = if input.detail.is_null() {
        Value::Object(Default::default())
    } else {
        input.detail
    };

    sqlx::query(
        "INSERT INTO agent_proposals (id, agent_id, proposal_type, title, summary, detail, \
         target_employee_id, target_entity_type, target_entity_id, risk_level, status, expires_at, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&input.agent_id)
    .bind(&input.proposal_type)
    .bind(&input.title)
    .bind(&input.summary)
    .bind(Json(detail))
    .bind(&input.target_employee_id)
    .bind(&input.target_entity_type)
    .bind(&input.target_entity_id)
    .bind(input.risk_level)
    .bind(ProposalStatus::Pending)
    .bind(expires_at)
    .bind(now)
    .execute(db.pool())
    .await?;

    tracing::info!(
        agent_id = %input.agent_id,
        proposal_id = %id,
        proposal_type = %input.proposal_type,
        risk = %input.risk_level,
        "Proposal created"
    );
    Ok(id)
}

pub async fn get_proposal(db: &Database, id: &str) -> AppResult<Option<Proposal>> {
    let proposal = sqlx::query_as::<_, Proposal>("SELECT * FROM agent_proposals WHERE id = ?")
        .bind(id)
        .fetch_optional(db.pool())
        .await?;
    Ok(proposal)
}

/// pending → auto_approved
pub async fn auto_approve(db: &Database, id: &str, now: DateTime<Utc>) -> AppResult<bool> {
    let result = sqlx::query(
        "UPDATE agent_proposals SET status = ?, reviewed_at = ?, review_notes = ? WHERE id = ? AND status = ?",
    )
    .bind(ProposalStatus::AutoApproved)
    .bind(now)
    .bind(AUTO_APPROVE_NOTE)
    .bind(id)
    .bind(ProposalStatus::Pending)
    .execute(db.pool())
    .await?;
    Ok(result.rows_affected() > 0)
}

/// pending → approved
pub async fn approve(
    db: &Database,
    id: &str,
    reviewer: &str,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    review(db, id, ProposalStatus::Approved, reviewer, notes, now).await
}

/// pending → rejected
pub async fn reject(
    db: &Database,
    id: &str,
    reviewer: &str,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    review(db, id, ProposalStatus::Rejected, reviewer, notes, now).await
}

async fn review(
    db: &Database,
    id: &str,
    status: ProposalStatus,
    reviewer: &str,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    let result = sqlx::query(
        "UPDATE agent_proposals SET status = ?, reviewed_by = ?, reviewed_at = ?, review_notes = ? \
         WHERE id = ? AND status = ?",
    )
    .bind(status)
    .bind(reviewer)
    .bind(now)
    .bind(notes)
    .bind(id)
    .bind(ProposalStatus::Pending)
    .execute(db.pool())
    .await?;

    let changed = result.rows_affected() > 0;
    if changed {
        tracing::info!(proposal_id = id, reviewer, %status, "Proposal reviewed");
    }
    Ok(changed)
}

/// approved | auto_approved → applied
pub async fn mark_applied(db: &Database, id: &str, now: DateTime<Utc>) -> AppResult<bool> {
    let result = sqlx::query(
        "UPDATE agent_proposals SET status = ?, applied_at = ? WHERE id = ? AND status IN (?, ?)",
    )
    .bind(ProposalStatus::Applied)
    .bind(now)
    .bind(id)
    .bind(ProposalStatus::Approved)
    .bind(ProposalStatus::AutoApproved)
    .execute(db.pool())
    .await?;
    Ok(result.rows_affected() > 0)
}

/// pending | auto_approved | approved → applied, acknowledged by an admin
pub async fn resolve(
    db: &Database,
    id: &str,
    reviewer: &str,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    let result = sqlx::query(
        "UPDATE agent_proposals SET status = ?, reviewed_by = ?, reviewed_at = ?, applied_at = ?, \
         review_notes = ? WHERE id = ? AND status IN (?, ?, ?)",
    )
    .bind(ProposalStatus::Applied)
    .bind(reviewer)
    .bind(now)
    .bind(now)
    .bind(notes.unwrap_or(RESOLVE_NOTE))
    .bind(id)
    .bind(ProposalStatus::Pending)
    .bind(ProposalStatus::AutoApproved)
    .bind(ProposalStatus::Approved)
    .execute(db.pool())
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Resolve every proposal matching the filter; defaults to pending and auto_approved
pub async fn bulk_resolve(
    db: &Database,
    reviewer: &str,
    filter: &BulkResolveFilter,
    now: DateTime<Utc>,
) -> AppResult<u64> {
    let statuses = match filter.status {
        Some(status) => vec![status],
        None => vec![ProposalStatus::AutoApproved, ProposalStatus::Pending],
    };

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE agent_proposals SET status = ");
    query
        .push_bind(ProposalStatus::Applied)
        .push(", reviewed_by = ")
        .push_bind(reviewer.to_string())
        .push(", reviewed_at = ")
        .push_bind(now)
        .push(", applied_at = ")
        .push_bind(now)
        .push(", review_notes = ")
        .push_bind(BULK_RESOLVE_NOTE)
        .push(" WHERE status IN (");
    let mut separated = query.separated(", ");
    for status in statuses {
        separated.push_bind(status);
    }
    separated.push_unseparated(")");
    if let Some(agent_id) = &filter.agent_id {
        query.push(" AND agent_id = ").push_bind(agent_id.clone());
    }

    let result = query.build().execute(db.pool()).await?;
    let count = result.rows_affected();
    tracing::info!(reviewer, count, "Proposals bulk resolved");
    Ok(count)
}

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &ProposalFilter) {
    if let Some(agent_id) = &filter.agent_id {
        query.push(" AND agent_id = ").push_bind(agent_id.clone());
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status);
    }
    if let Some(proposal_type) = &filter.proposal_type {
        query.push(" AND proposal_type = ").push_bind(proposal_type.clone());
    }
    if let Some(employee_id) = &filter.target_employee_id {
        query.push(" AND target_employee_id = ").push_bind(employee_id.clone());
    }
}

/// Newest first; `total` counts every match, not just the page
pub async fn list_proposals(db: &Database, filter: &ProposalFilter) -> AppResult<ProposalPage> {
    let limit = filter.limit.unwrap_or(DEFAULT_PROPOSAL_LIMIT).clamp(1, 500);
    let offset = filter.offset.unwrap_or(0).max(0);

    let mut count_query: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT COUNT(*) FROM agent_proposals WHERE 1 = 1");
    push_filters(&mut count_query, filter);
    let (total,): (i64,) = count_query.build_query_as().fetch_one(db.pool()).await?;

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM agent_proposals WHERE 1 = 1");
    push_filters(&mut query, filter);
    query
        .push(" ORDER BY created_at DESC, rowid DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);
    let proposals = query.build_query_as::<Proposal>().fetch_all(db.pool()).await?;

    Ok(ProposalPage { proposals, total })
}

/// Oldest pending proposals first
pub async fn list_pending(db: &Database, limit: i64) -> AppResult<Vec<Proposal>> {
    let proposals = sqlx::query_as::<_, Proposal>(
        "SELECT * FROM agent_proposals WHERE status = ? ORDER BY created_at, rowid LIMIT ?",
    )
    .bind(ProposalStatus::Pending)
    .bind(limit)
    .fetch_all(db.pool())
    .await?;
    Ok(proposals)
}

/// Approved proposals whose side effect has not run yet, oldest first
pub async fn list_unapplied(db: &Database, limit: i64) -> AppResult<Vec<Proposal>> {
    let proposals = sqlx::query_as::<_, Proposal>(
        "SELECT * FROM agent_proposals WHERE status IN (?, ?) AND applied_at IS NULL \
         ORDER BY created_at, rowid LIMIT ?",
    )
    .bind(ProposalStatus::Approved)
    .bind(ProposalStatus::AutoApproved)
    .bind(limit)
    .fetch_all(db.pool())
    .await?;
    Ok(proposals)
}

pub async fn count_pending(db: &Database) -> AppResult<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM agent_proposals WHERE status = ?")
        .bind(ProposalStatus::Pending)
        .fetch_one(db.pool())
        .await?;
    Ok(count)
}

/// Counts per status; every status is present even when zero
pub async fn proposal_stats(db: &Database, agent_id: Option<&str>) -> AppResult<BTreeMap<String, i64>> {
    let mut query: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT status, COUNT(*) FROM agent_proposals WHERE 1 = 1");
    if let Some(agent_id) = agent_id {
        query.push(" AND agent_id = ").push_bind(agent_id.to_string());
    }
    query.push(" GROUP BY status");
    let rows: Vec<(ProposalStatus, i64)> = query.build_query_as().fetch_all(db.pool()).await?;

    let mut stats: BTreeMap<String, i64> = ProposalStatus::ALL
        .iter()
        .map(|s| (s.to_string(), 0))
        .collect();
    for (status, count) in rows {
        stats.insert(status.to_string(), count);
    }
    Ok(stats)
}

/// pending proposals past their `expires_at` become `expired`
pub async fn expire_stale(db: &Database, now: DateTime<Utc>) -> AppResult<u64> {
    let result = sqlx::query(
        "UPDATE agent_proposals SET status = ? WHERE status = ? AND expires_at IS NOT NULL AND expires_at < ?",
    )
    .bind(ProposalStatus::Expired)
    .bind(ProposalStatus::Pending)
    .bind(now)
    .execute(db.pool())
    .await?;

    let count = result.rows_affected();
    if count > 0 {
        tracing::info!(count, "Expired stale proposals");
    }
    Ok(count)
}

/// Merge routing annotations into a proposal's `detail`
pub async fn annotate_routing(db: &Database, id: &str, patch: &Value) -> AppResult<bool> {
    let Some(proposal) = get_proposal(db, id).await? else {
        return Ok(false);
    };

    let mut detail = match proposal.detail.0 {
        Value::Object(map) => map,
        _ => Default::default(),
    };
    if let Value::Object(patch) = patch {
        for (key, value) in patch {
            detail.insert(key.clone(), value.clone());
        }
    }

    let result = sqlx::query("UPDATE agent_proposals SET detail = ? WHERE id = ?")
        .bind(Json(Value::Object(detail)))
        .bind(id)
        .execute(db.pool())
        .await?;
    Ok(result.rows_affected() > 0)
}
