//! Side effects of approved proposals
//!
//! Each proposal type maps to an applier. HR tables live outside this
//! service, so reports are informational and alerts become Slack messages.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::proposals;
use super::types::{Proposal, RiskLevel};
use crate::error::AppResult;
use crate::notify::{self, NotificationPriority, SlackNotification};
use crate::services::Services;

/// Proposals swept per notifications tick
pub const DEFAULT_APPLY_BATCH: i64 = 50;

/// Types whose content is the whole deliverable
pub const INFORMATIONAL_TYPES: &[&str] = &[
    "skill_gap_report",
    "hr_audit_report",
    "attendance_report",
    "compliance_report",
    "engagement_report",
    "health_report",
    "referral_insight",
    "access_review",
];

/// Types delivered to a person or channel on Slack
pub const NOTIFICATION_TYPES: &[&str] = &[
    "nudge",
    "review_reminder",
    "compliance_alert",
    "attendance_flag",
    "payroll_anomaly",
    "engagement_alert",
];

#[async_trait]
pub trait Applier: Send + Sync {
    async fn apply(&self, proposal: &Proposal, services: &Services) -> AppResult<()>;
}

/// Nothing to do beyond marking the proposal applied
pub struct Informational;

#[async_trait]
impl Applier for Informational {
    async fn apply(&self, _proposal: &Proposal, _services: &Services) -> AppResult<()> {
        Ok(())
    }
}

/// Queue a Slack message built from the proposal
pub struct SlackAlert;

impl SlackAlert {
    fn notification(proposal: &Proposal, alerts_channel: &str) -> SlackNotification {
        let slack_user_id = proposal.detail_str("slack_user_id").map(str::to_string);
        let slack_channel = proposal
            .detail_str("slack_channel")
            .map(str::to_string)
            .or_else(|| slack_user_id.is_none().then(|| alerts_channel.to_string()));

        let priority = proposal
            .detail_str("priority")
            .and_then(|p| p.parse().ok())
            .unwrap_or(match proposal.risk_level {
                RiskLevel::High => NotificationPriority::High,
                _ => NotificationPriority::Normal,
            });

        SlackNotification {
            slack_user_id,
            slack_channel,
            notification_type: proposal.proposal_type.clone(),
            title: proposal.title.clone(),
            body: proposal
                .detail_str("message")
                .or(proposal.summary.as_deref())
                .unwrap_or(&proposal.title)
                .to_string(),
            priority,
            agent_id: Some(proposal.agent_id.clone()),
            data: Some(json!({ "proposal_id": proposal.id })),
        }
    }
}

#[async_trait]
impl Applier for SlackAlert {
    async fn apply(&self, proposal: &Proposal, services: &Services) -> AppResult<()> {
        let notification = Self::notification(proposal, &services.config.alerts_channel);
        notify::enqueue_slack(&services.db, notification, Utc::now()).await?;
        Ok(())
    }
}

pub struct ApplierRegistry {
    appliers: HashMap<String, Arc<dyn Applier>>,
}

impl ApplierRegistry {
    pub fn empty() -> Self {
        Self {
            appliers: HashMap::new(),
        }
    }

    pub fn register(&mut self, proposal_type: &str, applier: Arc<dyn Applier>) {
        self.appliers.insert(proposal_type.to_string(), applier);
    }

    pub fn get(&self, proposal_type: &str) -> Option<Arc<dyn Applier>> {
        self.appliers.get(proposal_type).cloned()
    }
}

impl Default for ApplierRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        let informational: Arc<dyn Applier> = Arc::new(Informational);
        let slack: Arc<dyn Applier> = Arc::new(SlackAlert);
        for kind in INFORMATIONAL_TYPES {
            registry.register(kind, informational.clone());
        }
        for kind in NOTIFICATION_TYPES {
            registry.register(kind, slack.clone());
        }
        registry
    }
}

/// Run the side effect of one approved proposal and mark it applied.
///
/// Returns `false` when the proposal is missing, not approved, or its applier
/// failed; a failed proposal stays approved and is retried by the next sweep.
pub async fn apply_proposal(services: &Services, proposal_id: &str) -> AppResult<bool> {
    let Some(proposal) = proposals::get_proposal(&services.db, proposal_id).await? else {
        tracing::warn!(proposal_id, "Proposal not found");
        return Ok(false);
    };

    if !proposal.status.is_approved() {
        tracing::warn!(proposal_id, status = %proposal.status, "Proposal not in approvable state");
        return Ok(false);
    }

    let Some(applier) = services.appliers.get(&proposal.proposal_type) else {
        tracing::warn!(proposal_id, proposal_type = %proposal.proposal_type, "No applier for proposal type");
        proposals::mark_applied(&services.db, proposal_id, Utc::now()).await?;
        return Ok(true);
    };

    match applier.apply(&proposal, services).await {
        Ok(()) => {
            proposals::mark_applied(&services.db, proposal_id, Utc::now()).await?;
            tracing::info!(proposal_id, proposal_type = %proposal.proposal_type, "Applied proposal");
            Ok(true)
        }
        Err(err) => {
            tracing::error!(
                proposal_id,
                proposal_type = %proposal.proposal_type,
                error = %err,
                "Failed to apply proposal"
            );
            Ok(false)
        }
    }
}

/// Apply approved proposals that have not been applied yet, oldest first
pub async fn process_approved(services: &Services, limit: i64) -> AppResult<u32> {
    let mut applied = 0;
    for proposal in proposals::list_unapplied(&services.db, limit).await? {
        if apply_proposal(services, &proposal.id).await? {
            applied += 1;
        }
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::proposals::tests::new_proposal;
    use crate::agents::types::ProposalStatus;
    use crate::error::AppError;
    use crate::notify::due_notifications;
    use crate::services::tests::test_services;

    struct Failing;

    #[async_trait]
    impl Applier for Failing {
        async fn apply(&self, _proposal: &Proposal, _services: &Services) -> AppResult<()> {
            Err(AppError::unknown("target table unavailable"))
        }
    }

    async fn approved(services: &Services, proposal_type: &str, detail: serde_json::Value) -> String {
        let mut input = new_proposal("engagement_pulse", proposal_type, RiskLevel::Low);
        input.detail = detail;
        let id = proposals::create_proposal(&services.db, input, Utc::now()).await.unwrap();
        proposals::approve(&services.db, &id, "admin", None, Utc::now()).await.unwrap();
        id
    }

    async fn status_of(services: &Services, id: &str) -> ProposalStatus {
        proposals::get_proposal(&services.db, id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_informational_and_unknown_types_are_marked_applied() {
        let services = test_services().await;
        let report = approved(&services, "health_report", json!({})).await;
        let unknown = approved(&services, "new_skill", json!({})).await;

        assert!(apply_proposal(&services, &report).await.unwrap());
        assert!(apply_proposal(&services, &unknown).await.unwrap());
        assert_eq!(status_of(&services, &report).await, ProposalStatus::Applied);
        assert_eq!(status_of(&services, &unknown).await, ProposalStatus::Applied);
    }

    #[tokio::test]
    async fn test_pending_or_missing_is_not_applied() {
        let services = test_services().await;
        let pending = proposals::create_proposal(
            &services.db,
            new_proposal("a", "nudge", RiskLevel::Low),
            Utc::now(),
        )
        .await
        .unwrap();

        assert!(!apply_proposal(&services, &pending).await.unwrap());
        assert!(!apply_proposal(&services, "missing").await.unwrap());
        assert_eq!(status_of(&services, &pending).await, ProposalStatus::Pending);
    }

    #[tokio::test]
    async fn test_notification_types_queue_slack_messages() {
        let services = test_services().await;
        let dm = approved(&services, "nudge", json!({"slack_user_id": "U42"})).await;
        let fallback = approved(&services, "payroll_anomaly", json!({})).await;

        assert_eq!(process_approved(&services, DEFAULT_APPLY_BATCH).await.unwrap(), 2);

        let queued = due_notifications(&services.db, Utc::now(), 10).await.unwrap();
        assert_eq!(queued.len(), 2);
        assert!(queued.iter().any(|n| n.slack_user_id.as_deref() == Some("U42") && n.channel.is_none()));
        assert!(queued
            .iter()
            .any(|n| n.channel.as_deref() == Some(crate::config::DEFAULT_ALERTS_CHANNEL)));
        assert_eq!(status_of(&services, &dm).await, ProposalStatus::Applied);
        assert_eq!(status_of(&services, &fallback).await, ProposalStatus::Applied);
    }

    #[tokio::test]
    async fn test_failed_applier_leaves_proposal_approved() {
        let mut services = test_services().await;
        let mut registry = ApplierRegistry::default();
        registry.register("course_draft", Arc::new(Failing));
        services.appliers = Arc::new(registry);

        let id = approved(&services, "course_draft", json!({})).await;
        assert!(!apply_proposal(&services, &id).await.unwrap());
        assert_eq!(status_of(&services, &id).await, ProposalStatus::Approved);
        assert_eq!(process_approved(&services, DEFAULT_APPLY_BATCH).await.unwrap(), 0);
    }

    #[test]
    fn test_slack_alert_priority_from_risk() {
        let proposal = Proposal {
            id: "p".into(),
            agent_id: "payroll_watchdog".into(),
            proposal_type: "payroll_anomaly".into(),
            title: "Overtime spike".into(),
            summary: Some("3 employees over 60h".into()),
            detail: sqlx::types::Json(json!({"slack_channel": "#payroll"})),
            target_employee_id: None,
            target_entity_type: None,
            target_entity_id: None,
            risk_level: RiskLevel::High,
            status: ProposalStatus::Approved,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            applied_at: None,
            expires_at: None,
            created_at: Utc::now(),
        };
        let notification = SlackAlert::notification(&proposal, "#agent-alerts");
        assert_eq!(notification.slack_channel.as_deref(), Some("#payroll"));
        assert_eq!(notification.priority, NotificationPriority::High);
        assert_eq!(notification.body, "3 employees over 60h");
    }
}
