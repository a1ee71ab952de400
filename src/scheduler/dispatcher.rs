//! Scheduled entry points shared by the internal scheduler and the cron
//! HTTP endpoints

use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use ts_rs::TS;

use super::cron_expr;
use crate::agents::registry::{self, AgentFilter};
use crate::agents::types::{AgentStatus, RunStatus, TriggerType};
use crate::agents::{appliers, execute_agent_run, proposals};
use crate::constants::{agents_for_event, DISPATCHER_SOURCE, DISPATCH_MIN_INTERVAL_MINUTES};
use crate::error::{AppError, AppResult};
use crate::notify::{self, DEFAULT_QUEUE_BATCH};
use crate::services::Services;

/// Per-agent result of a dispatch or event fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "agents/")]
pub enum TriggerStatus {
    Success,
    Partial,
    Error,
    Skipped,
}

impl From<RunStatus> for TriggerStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Partial => TriggerStatus::Partial,
            RunStatus::Error => TriggerStatus::Error,
            RunStatus::Running | RunStatus::Success => TriggerStatus::Success,
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "agents/")]
pub struct AgentTriggerResult {
    pub agent_id: String,
    pub status: TriggerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentTriggerResult {
    fn from_run(agent_id: &str, result: AppResult<RunStatus>) -> Self {
        match result {
            Ok(status) => Self {
                agent_id: agent_id.to_string(),
                status: status.into(),
                error: None,
            },
            Err(err) => Self {
                agent_id: agent_id.to_string(),
                status: TriggerStatus::Error,
                error: Some(err.message),
            },
        }
    }

    fn skipped(agent_id: &str, reason: Option<&str>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            status: TriggerStatus::Skipped,
            error: reason.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "agents/")]
pub struct DispatchReport {
    pub success: bool,
    #[ts(type = "number")]
    pub agents_checked: usize,
    #[ts(type = "number")]
    pub agents_run: usize,
    pub results: Vec<AgentTriggerResult>,
    #[ts(type = "number")]
    pub proposals_expired: u64,
    #[ts(type = "number")]
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "agents/")]
pub struct NotificationsReport {
    pub success: bool,
    pub slack_sent: u32,
    pub slack_failed: u32,
    pub proposals_applied: u32,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "agents/")]
pub struct EventReport {
    pub success: bool,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub triggered: Vec<AgentTriggerResult>,
}

/// Run every active agent whose schedule matches `now`, one after another
pub async fn dispatch(services: &Services, now: DateTime<Utc>) -> AppResult<DispatchReport> {
    let started = Instant::now();
    let filter = AgentFilter {
        status: Some(AgentStatus::Active),
        cluster: None,
    };
    let agents = registry::list_agents(&services.db, &filter).await?;
    let due: Vec<_> = agents.iter().filter(|a| cron_expr::is_agent_due(a, now)).collect();

    if due.is_empty() {
        tracing::debug!(active_agents = agents.len(), "No agents due to run");
    } else {
        tracing::info!(
            due = ?due.iter().map(|a| a.agent_id.as_str()).collect::<Vec<_>>(),
            "Agents due to run"
        );
    }

    let min_interval = Duration::minutes(DISPATCH_MIN_INTERVAL_MINUTES);
    let mut results = Vec::with_capacity(due.len());
    let mut agents_run = 0;

    for agent in due {
        if let Some(last_run_at) = agent.last_run_at {
            let since = now - last_run_at;
            if since < min_interval {
                tracing::info!(
                    agent_id = %agent.agent_id,
                    seconds_since_last_run = since.num_seconds(),
                    "Skipping agent that ran recently"
                );
                results.push(AgentTriggerResult::skipped(&agent.agent_id, None));
                continue;
            }
        }

        agents_run += 1;
        let outcome = execute_agent_run(services, &agent.agent_id, TriggerType::Cron, Some(DISPATCHER_SOURCE))
            .await
            .map(|o| o.status);
        results.push(AgentTriggerResult::from_run(&agent.agent_id, outcome));
    }

    let proposals_expired = proposals::expire_stale(&services.db, now).await?;
    let duration_ms = started.elapsed().as_millis() as i64;

    tracing::info!(
        agents_checked = agents.len(),
        agents_run,
        proposals_expired,
        duration_ms,
        "Dispatcher finished"
    );

    Ok(DispatchReport {
        success: true,
        agents_checked: agents.len(),
        agents_run,
        results,
        proposals_expired,
        duration_ms,
    })
}

/// Midnight reset of every non-disabled agent's token usage
pub async fn reset_budgets(services: &Services, now: DateTime<Utc>) -> AppResult<u64> {
    registry::reset_daily_budgets(&services.db, now).await
}

/// Drain the Slack queue (when a bot token is configured), then apply
/// approved proposals
pub async fn process_notifications(services: &Services, now: DateTime<Utc>) -> AppResult<NotificationsReport> {
    let mut report = NotificationsReport {
        success: true,
        ..NotificationsReport::default()
    };

    match &services.slack {
        Some(client) => {
            let queue = notify::process_queue(&services.db, client, now, DEFAULT_QUEUE_BATCH).await?;
            report.slack_sent = queue.slack_sent;
            report.slack_failed = queue.slack_failed;
        }
        None => tracing::debug!("Slack not configured, queue left pending"),
    }

    report.proposals_applied = appliers::process_approved(services, appliers::DEFAULT_APPLY_BATCH).await?;
    Ok(report)
}

/// Fan a business event out to the agents listening for it. Listeners run
/// concurrently; inactive ones are reported as skipped.
pub async fn route_event(services: &Services, event: &str, payload: &Value) -> AppResult<EventReport> {
    let event = event.trim();
    if event.is_empty() {
        return Err(AppError::invalid_params("Missing \"event\" field"));
    }

    let listeners = agents_for_event(event);
    if listeners.is_empty() {
        return Ok(EventReport {
            success: true,
            event: event.to_string(),
            message: Some(format!("No agents registered for event \"{}\"", event)),
            triggered: Vec::new(),
        });
    }

    tracing::info!(event, agents = ?listeners, has_payload = !payload.is_null(), "Routing event");

    let filter = AgentFilter {
        status: Some(AgentStatus::Active),
        cluster: None,
    };
    let active: Vec<String> = registry::list_agents(&services.db, &filter)
        .await?
        .into_iter()
        .map(|a| a.agent_id)
        .collect();

    let (to_run, inactive): (Vec<&str>, Vec<&str>) =
        listeners.iter().copied().partition(|id| active.iter().any(|a| a == id));

    let mut triggered: Vec<AgentTriggerResult> = inactive
        .iter()
        .map(|id| AgentTriggerResult::skipped(id, Some("Agent not active")))
        .collect();

    let runs = join_all(
        to_run
            .iter()
            .map(|id| execute_agent_run(services, id, TriggerType::Event, Some(event))),
    )
    .await;

    triggered.extend(
        to_run
            .iter()
            .zip(runs)
            .map(|(id, outcome)| AgentTriggerResult::from_run(id, outcome.map(|o| o.status))),
    );

    Ok(EventReport {
        success: true,
        event: event.to_string(),
        message: None,
        triggered,
    })
}
