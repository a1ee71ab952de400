//! Append-only admin audit trail

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;

use super::Database;
use crate::error::AppResult;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditLog {
    pub id: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub actor_profile_id: Option<String>,
    pub metadata: Json<Value>,
    pub created_at: DateTime<Utc>,
}

/// One audited admin action
#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub action: &'a str,
    pub entity_type: &'a str,
    pub entity_id: Option<&'a str>,
    pub actor_profile_id: Option<&'a str>,
    pub metadata: Value,
}

/// Write an audit row. Failures are logged and swallowed so the audited
/// action itself is never rolled back by its audit trail.
pub async fn record(db: &Database, entry: AuditEntry<'_>, now: DateTime<Utc>) {
    let result = sqlx::query(
        "INSERT INTO audit_logs (id, action, entity_type, entity_id, actor_profile_id, metadata, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(entry.action)
    .bind(entry.entity_type)
    .bind(entry.entity_id)
    .bind(entry.actor_profile_id)
    .bind(Json(entry.metadata))
    .bind(now)
    .execute(db.pool())
    .await;

    if let Err(err) = result {
        tracing::warn!(action = entry.action, error = %err, "Failed to write audit log");
    }
}

/// Most recent entries first
pub async fn recent(db: &Database, limit: i64) -> AppResult<Vec<AuditLog>> {
    let rows = sqlx::query_as::<_, AuditLog>("SELECT * FROM audit_logs ORDER BY created_at DESC, rowid DESC LIMIT ?")
        .bind(limit)
        .fetch_all(db.pool())
        .await?;
    Ok(rows)
}
