//! Slack notification queue
//!
//! Agents never talk to Slack directly. They enqueue rows in
//! `notification_queue`, and the notifications tick drains the queue in
//! priority order, retrying failed sends up to `max_retries` times.

pub mod slack;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::types::Json;
use sqlx::{FromRow, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;

pub use slack::SlackClient;

use crate::db::Database;
use crate::error::{AppError, AppResult};

/// Rows drained per tick
pub const DEFAULT_QUEUE_BATCH: i64 = 30;

/// Send attempts before a row is marked failed
pub const DEFAULT_MAX_RETRIES: i64 = 3;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "notification_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[ts(export, export_to = "agents/")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl NotificationPriority {
    /// Numeric rank used for ordering the queue
    pub fn rank(self) -> i64 {
        match self {
            NotificationPriority::Low => 0,
            NotificationPriority::Normal => 1,
            NotificationPriority::High => 2,
            NotificationPriority::Urgent => 3,
        }
    }
}

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display,
)]
#[sqlx(type_name = "notification_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[ts(export, export_to = "agents/")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

/// Row of `notification_queue`
#[derive(Debug, Clone, FromRow, Serialize, TS)]
#[ts(export, export_to = "agents/")]
pub struct QueuedNotification {
    pub id: String,
    pub channel: Option<String>,
    pub slack_user_id: Option<String>,
    pub message: String,
    #[ts(type = "Array<unknown>")]
    pub blocks: Json<Value>,
    pub priority: NotificationPriority,
    #[ts(type = "number")]
    pub priority_rank: i64,
    pub status: NotificationStatus,
    #[ts(type = "number")]
    pub retry_count: i64,
    #[ts(type = "number")]
    pub max_retries: i64,
    pub error_message: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    #[ts(type = "Record<string, unknown>")]
    pub metadata: Json<Value>,
    pub created_at: DateTime<Utc>,
}

/// A Slack message requested by an agent or an applier
#[derive(Debug, Clone, Default)]
pub struct SlackNotification {
    pub slack_user_id: Option<String>,
    pub slack_channel: Option<String>,
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub priority: NotificationPriority,
    pub agent_id: Option<String>,
    pub data: Option<Value>,
}

/// Outcome of one queue drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueReport {
    pub slack_sent: u32,
    pub slack_failed: u32,
}

/// Header, body and (for agent messages) attribution context blocks
pub fn build_blocks(notification: &SlackNotification) -> Value {
    let mut blocks = vec![
        json!({
            "type": "header",
            "text": { "type": "plain_text", "text": notification.title, "emoji": true }
        }),
        json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": notification.body }
        }),
    ];
    if let Some(agent_id) = &notification.agent_id {
        blocks.push(json!({
            "type": "context",
            "elements": [{ "type": "mrkdwn", "text": format!("🤖 _Sent by agent: {}_", agent_id) }]
        }));
    }
    Value::Array(blocks)
}

/// Queue a Slack message; at least one of user or channel is required
pub async fn enqueue_slack(db: &Database, notification: SlackNotification, now: DateTime<Utc>) -> AppResult<String> {
    if notification.slack_user_id.is_none() && notification.slack_channel.is_none() {
        return Err(AppError::invalid_params("Slack notification needs a user or a channel"));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let blocks = build_blocks(&notification);

    let mut metadata = json!({
        "source": "agent",
        "agent_id": notification.agent_id,
        "notification_type": notification.notification_type,
    });
    if let (Some(Value::Object(data)), Some(target)) = (&notification.data, metadata.as_object_mut()) {
        for (key, value) in data {
            target.insert(key.clone(), value.clone());
        }
    }

    sqlx::query(
        "INSERT INTO notification_queue (id, channel, slack_user_id, message, blocks, priority, priority_rank, \
         status, retry_count, max_retries, scheduled_for, metadata, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&notification.slack_channel)
    .bind(&notification.slack_user_id)
    .bind(&notification.body)
    .bind(Json(blocks))
    .bind(notification.priority)
    .bind(notification.priority.rank())
    .bind(NotificationStatus::Pending)
    .bind(DEFAULT_MAX_RETRIES)
    .bind(now)
    .bind(Json(metadata))
    .bind(now)
    .execute(db.pool())
    .await?;

    tracing::debug!(
        notification_id = %id,
        notification_type = %notification.notification_type,
        priority = %notification.priority,
        "Slack notification queued"
    );
    Ok(id)
}

pub async fn get_notification(db: &Database, id: &str) -> AppResult<Option<QueuedNotification>> {
    let row = sqlx::query_as::<_, QueuedNotification>("SELECT * FROM notification_queue WHERE id = ?")
        .bind(id)
        .fetch_optional(db.pool())
        .await?;
    Ok(row)
}

/// Pending rows due by `now`, highest priority first, then oldest
pub async fn due_notifications(db: &Database, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<QueuedNotification>> {
    let rows = sqlx::query_as::<_, QueuedNotification>(
        "SELECT * FROM notification_queue WHERE status = ? AND scheduled_for <= ? \
         ORDER BY priority_rank DESC, created_at, rowid LIMIT ?",
    )
    .bind(NotificationStatus::Pending)
    .bind(now)
    .bind(limit)
    .fetch_all(db.pool())
    .await?;
    Ok(rows)
}

async fn deliver(client: &SlackClient, notification: &QueuedNotification) -> AppResult<()> {
    let channel = match (&notification.channel, &notification.slack_user_id) {
        (Some(channel), _) => channel.clone(),
        (None, Some(user_id)) => client.open_dm(user_id).await?,
        (None, None) => return Err(AppError::invalid_params("No channel or slack_user_id specified")),
    };
    client
        .post_message(&channel, &notification.message, &notification.blocks.0)
        .await
}

/// Drain up to `limit` due rows, one at a time
pub async fn process_queue(
    db: &Database,
    client: &SlackClient,
    now: DateTime<Utc>,
    limit: i64,
) -> AppResult<QueueReport> {
    let mut report = QueueReport::default();

    for notification in due_notifications(db, now, limit).await? {
        match deliver(client, &notification).await {
            Ok(()) => {
                sqlx::query("UPDATE notification_queue SET status = ?, sent_at = ? WHERE id = ?")
                    .bind(NotificationStatus::Sent)
                    .bind(Utc::now())
                    .bind(&notification.id)
                    .execute(db.pool())
                    .await?;
                report.slack_sent += 1;
            }
            Err(err) => {
                let retry_count = notification.retry_count + 1;
                let status = if retry_count < notification.max_retries {
                    NotificationStatus::Pending
                } else {
                    NotificationStatus::Failed
                };
                tracing::warn!(
                    notification_id = %notification.id,
                    retry_count,
                    %status,
                    error = %err,
                    "Slack delivery failed"
                );

                sqlx::query(
                    "UPDATE notification_queue SET status = ?, retry_count = ?, error_message = ? WHERE id = ?",
                )
                .bind(status)
                .bind(retry_count)
                .bind(err.to_string())
                .bind(&notification.id)
                .execute(db.pool())
                .await?;
                report.slack_failed += 1;
            }
        }
    }

    if report.slack_sent + report.slack_failed > 0 {
        tracing::info!(sent = report.slack_sent, failed = report.slack_failed, "Notification queue processed");
    }
    Ok(report)
}
