//! Supervisor agent
//!
//! Sweeps the pending proposal queue and watches the rest of the fleet:
//! stuck runs, error streaks, token budgets and backlog size. Findings are
//! filed as an auto-approved `health_report` proposal.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::handlers::{AgentHandler, RunContext, RunOutcome};
use super::proposals;
use super::registry::{self, AgentFilter};
use super::runs;
use super::types::{Agent, AgentStatus, NewProposal, Proposal, RiskLevel, RunStatus};
use crate::error::AppResult;
use crate::events::AgentEventKind;
use crate::llm::{ChatMessage, ChatOptions, ModelTier};
use crate::notify::{self, NotificationPriority, SlackNotification};

/// Proposal types approved without review at low risk
pub const AUTO_APPROVE_TYPES: &[&str] = &[
    "nudge",
    "engagement_alert",
    "engagement_report",
    "review_reminder",
    "new_skill",
    "skill_gap_report",
    "course_draft",
    "mentor_match",
    "hr_audit_report",
    "attendance_report",
    "compliance_report",
    "system_health_report",
];

/// Proposal types a human always reviews
pub const ALWAYS_HUMAN_REVIEW_TYPES: &[&str] = &[
    "schedule_draft",
    "review_summary_draft",
    "disciplinary_recommendation",
];

pub const PENDING_BATCH: i64 = 50;
pub const STUCK_RUN_MINUTES: i64 = 30;
pub const ERROR_STREAK_WARNING: i64 = 3;
pub const ERROR_STREAK_PAUSE: i64 = 5;
pub const BUDGET_WARNING_THRESHOLD: f64 = 0.8;
pub const BACKLOG_WARNING: i64 = 100;
pub const HEALTH_REPORT_TTL_HOURS: i64 = 24;

const RISK_EVALUATOR_PROMPT: &str = "You are a risk evaluator for an AI agent workforce at a veterinary practice. \
Evaluate if a medium-risk proposal can be safely auto-approved. \
Respond with JSON: { \"approve\": true/false, \"reason\": \"explanation\" }";

/// Where a pending proposal goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    AutoApprove,
    Admin,
    Manager,
    Evaluate,
    AdminWithAlert,
}

fn route_for(proposal: &Proposal) -> Route {
    let proposal_type = proposal.proposal_type.as_str();
    if ALWAYS_HUMAN_REVIEW_TYPES.contains(&proposal_type) {
        return Route::Admin;
    }
    match proposal.risk_level {
        RiskLevel::Low if AUTO_APPROVE_TYPES.contains(&proposal_type) => Route::AutoApprove,
        RiskLevel::Low => Route::Manager,
        RiskLevel::Medium => Route::Evaluate,
        RiskLevel::High => Route::AdminWithAlert,
    }
}

#[derive(Debug, Deserialize)]
struct RiskEvaluation {
    #[serde(default)]
    approve: bool,
}

#[derive(Debug, Default)]
struct Sweep {
    auto_approved: i64,
    routed: i64,
    tokens_used: i64,
    cost_usd: f64,
}

pub struct SupervisorAgent;

impl SupervisorAgent {
    pub const AGENT_ID: &'static str = "supervisor_agent";

    async fn process_pending(&self, ctx: &RunContext, names: &HashMap<String, String>) -> AppResult<(usize, Sweep)> {
        let db = &ctx.services.db;
        let pending = proposals::list_pending(db, PENDING_BATCH).await?;
        tracing::info!(agent_id = %ctx.agent_id, count = pending.len(), "Pending proposals found");

        let mut sweep = Sweep::default();
        for proposal in &pending {
            match route_for(proposal) {
                Route::AutoApprove => {
                    if proposals::auto_approve(db, &proposal.id, Utc::now()).await? {
                        sweep.auto_approved += 1;
                    }
                }
                Route::Admin => {
                    route_to_admin(ctx, proposal).await?;
                    sweep.routed += 1;
                }
                Route::Manager => {
                    route_to_manager(ctx, proposal).await?;
                    sweep.routed += 1;
                }
                Route::Evaluate => {
                    let approve = match self.evaluate_risk(ctx, proposal, names).await {
                        Some((approve, tokens, cost)) => {
                            sweep.tokens_used += tokens;
                            sweep.cost_usd += cost;
                            approve
                        }
                        None => false,
                    };
                    if approve && proposals::auto_approve(db, &proposal.id, Utc::now()).await? {
                        sweep.auto_approved += 1;
                    } else {
                        route_to_admin(ctx, proposal).await?;
                        sweep.routed += 1;
                    }
                }
                Route::AdminWithAlert => {
                    route_to_admin(ctx, proposal).await?;
                    sweep.routed += 1;
                    alert_high_risk(ctx, proposal, names).await?;
                }
            }
        }
        Ok((pending.len(), sweep))
    }

    /// `None` when the evaluation failed; the proposal then goes to a human
    async fn evaluate_risk(
        &self,
        ctx: &RunContext,
        proposal: &Proposal,
        names: &HashMap<String, String>,
    ) -> Option<(bool, i64, f64)> {
        let agent_name = names.get(&proposal.agent_id).unwrap_or(&proposal.agent_id);
        let question = format!(
            "Agent: {}\nType: {}\nTitle: {}\nSummary: {}\nRisk Level: {}\n\nShould this be auto-approved?",
            agent_name,
            proposal.proposal_type,
            proposal.title,
            proposal.summary.as_deref().unwrap_or(""),
            proposal.risk_level,
        );
        let options = ChatOptions::new(
            ctx.agent_id.clone(),
            vec![ChatMessage::system(RISK_EVALUATOR_PROMPT), ChatMessage::user(question)],
        )
        .run_id(ctx.run_id.clone())
        .model(ModelTier::Fast)
        .max_tokens(200)
        .temperature(0.1);

        match ctx
            .services
            .llm
            .agent_chat_json::<RiskEvaluation>(&ctx.services.db, options)
            .await
        {
            Ok((evaluation, result)) => Some((evaluation.approve, result.tokens_used, result.cost_usd)),
            Err(err) => {
                tracing::warn!(proposal_id = %proposal.id, error = %err, "Risk evaluation failed, routing to admin");
                None
            }
        }
    }

    /// Fleet checks; returns the issues found and how many stuck runs were killed
    async fn check_health(&self, ctx: &RunContext, agents: &[Agent]) -> AppResult<(Vec<String>, usize)> {
        let db = &ctx.services.db;
        let now = Utc::now();
        let names = display_names(agents);
        let name_of = |agent_id: &str| names.get(agent_id).cloned().unwrap_or_else(|| agent_id.to_string());
        let mut issues = Vec::new();

        let stuck = runs::fail_stuck_runs(db, now - Duration::minutes(STUCK_RUN_MINUTES), now).await?;
        for run in &stuck {
            issues.push(format!("Stuck run killed: {} (run {})", name_of(&run.agent_id), run.id));
        }

        let mut streaks: Vec<(String, i64)> = runs::error_streaks(db, runs::ERROR_STREAK_WINDOW)
            .await?
            .into_iter()
            .filter(|(_, streak)| *streak >= ERROR_STREAK_WARNING)
            .collect();
        streaks.sort();
        for (agent_id, streak) in streaks {
            let name = name_of(&agent_id);
            issues.push(format!("{} has {} consecutive errors, consider pausing", name, streak));

            let active = agents
                .iter()
                .any(|a| a.agent_id == agent_id && a.status == AgentStatus::Active);
            if streak >= ERROR_STREAK_PAUSE
                && active
                && registry::update_agent_status(db, &agent_id, AgentStatus::Paused, now).await?
            {
                tracing::warn!(agent_id = %agent_id, streak, "Agent auto-paused");
                ctx.services.events.emit_kind(
                    AgentEventKind::AgentStatusChanged {
                        agent_id: agent_id.clone(),
                        status: AgentStatus::Paused,
                    },
                    Self::AGENT_ID,
                );
                issues.push(format!("AUTO-PAUSED {} after {} consecutive errors", name, streak));
            }
        }

        for agent in agents {
            let utilization = agent.budget_utilization();
            if agent.daily_token_budget > 0 && utilization >= BUDGET_WARNING_THRESHOLD {
                issues.push(format!(
                    "{}: {}% of daily token budget used",
                    agent.display_name,
                    (utilization * 100.0).round() as i64
                ));
            }
        }

        Ok((issues, stuck.len()))
    }

    async fn file_health_report(
        &self,
        ctx: &RunContext,
        issues: &[String],
        agents: &[Agent],
        stuck_killed: usize,
    ) -> AppResult<String> {
        let db = &ctx.services.db;
        let statuses: Vec<Value> = agents
            .iter()
            .map(|a| {
                json!({
                    "agent_id": a.agent_id,
                    "name": a.display_name,
                    "cluster": a.cluster,
                    "tokens_today": a.daily_tokens_used,
                    "budget": a.daily_token_budget,
                })
            })
            .collect();

        let report = NewProposal {
            agent_id: ctx.agent_id.clone(),
            proposal_type: "health_report".to_string(),
            title: format!("🤖 Agent Health: {} issue(s)", issues.len()),
            summary: Some(issues.iter().take(3).cloned().collect::<Vec<_>>().join("; ")),
            detail: json!({
                "issues": issues,
                "agent_statuses": statuses,
                "stuck_runs_killed": stuck_killed,
            }),
            risk_level: RiskLevel::Low,
            expires_in_hours: Some(HEALTH_REPORT_TTL_HOURS),
            ..NewProposal::default()
        };

        let id = proposals::create_proposal(db, report, Utc::now()).await?;
        ctx.services.events.emit_kind(
            AgentEventKind::ProposalCreated {
                agent_id: ctx.agent_id.clone(),
                proposal_id: id.clone(),
                proposal_type: "health_report".to_string(),
                risk_level: RiskLevel::Low,
            },
            Self::AGENT_ID,
        );
        proposals::auto_approve(db, &id, Utc::now()).await?;
        Ok(id)
    }
}

#[async_trait]
impl AgentHandler for SupervisorAgent {
    async fn run(&self, ctx: &RunContext) -> AppResult<RunOutcome> {
        let db = &ctx.services.db;
        tracing::info!(agent_id = %ctx.agent_id, run_id = %ctx.run_id, "Supervisor starting sweep");

        let agents = registry::list_agents(db, &AgentFilter::default()).await?;
        let names = display_names(&agents);

        let (pending_processed, mut sweep) = self.process_pending(ctx, &names).await?;
        let (mut issues, stuck_killed) = self.check_health(ctx, &agents).await?;

        let backlog = proposals::count_pending(db).await?;
        if backlog > BACKLOG_WARNING {
            issues.push(format!("High proposal backlog: {} pending", backlog));
        }

        let mut proposals_created = 0;
        if !issues.is_empty() {
            self.file_health_report(ctx, &issues, &agents, stuck_killed).await?;
            proposals_created += 1;
            sweep.auto_approved += 1;
        }

        let summary = format!(
            "Processed {} proposals ({} approved, {} routed). Health: {} issue(s).",
            pending_processed,
            sweep.auto_approved,
            sweep.routed,
            issues.len()
        );
        let metadata = json!({
            "pendingProcessed": pending_processed,
            "autoApproved": sweep.auto_approved,
            "routed": sweep.routed,
            "healthIssues": issues.len(),
            "stuckRunsKilled": stuck_killed,
            "backlogSize": backlog,
        });

        Ok(RunOutcome {
            status: RunStatus::Success,
            proposals_created,
            proposals_auto_approved: sweep.auto_approved,
            tokens_used: sweep.tokens_used,
            cost_usd: sweep.cost_usd,
            summary,
            metadata: match metadata {
                Value::Object(map) => map,
                _ => Default::default(),
            },
        })
    }
}

fn display_names(agents: &[Agent]) -> HashMap<String, String> {
    agents
        .iter()
        .map(|a| (a.agent_id.clone(), a.display_name.clone()))
        .collect()
}

async fn route_to_admin(ctx: &RunContext, proposal: &Proposal) -> AppResult<()> {
    let patch = json!({
        "routed_by": ctx.agent_id,
        "routed_at": Utc::now(),
        "routing_target": "admin",
    });
    proposals::annotate_routing(&ctx.services.db, &proposal.id, &patch).await?;
    Ok(())
}

/// Employee records are not held here, so the manager itself stays unresolved
async fn route_to_manager(ctx: &RunContext, proposal: &Proposal) -> AppResult<()> {
    let target = if proposal.target_employee_id.is_some() {
        "manager"
    } else {
        "admin"
    };
    let patch = json!({
        "routed_by": ctx.agent_id,
        "routed_at": Utc::now(),
        "routing_target": target,
        "target_manager_id": Value::Null,
    });
    proposals::annotate_routing(&ctx.services.db, &proposal.id, &patch).await?;
    Ok(())
}

async fn alert_high_risk(ctx: &RunContext, proposal: &Proposal, names: &HashMap<String, String>) -> AppResult<()> {
    let agent_name = names.get(&proposal.agent_id).unwrap_or(&proposal.agent_id);
    let notification = SlackNotification {
        slack_user_id: None,
        slack_channel: Some(ctx.services.config.alerts_channel.clone()),
        notification_type: "agent_high_risk_proposal".to_string(),
        title: format!("High-risk proposal: {}", proposal.title),
        body: format!(
            "*{}* filed a high-risk proposal that needs admin review.\n{}",
            agent_name,
            proposal.summary.as_deref().unwrap_or("")
        ),
        priority: NotificationPriority::High,
        agent_id: Some(ctx.agent_id.clone()),
        data: Some(json!({
            "proposal_id": proposal.id,
            "proposal_agent_id": proposal.agent_id,
            "agent_name": agent_name,
        })),
    };
    notify::enqueue_slack(&ctx.services.db, notification, Utc::now()).await?;
    Ok(())
}
