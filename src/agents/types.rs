use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;

/// Lifecycle state of a registered agent
#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "agent_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[ts(export, export_to = "agents/")]
pub enum AgentStatus {
    #[default]
    Active,
    Paused,
    Disabled,
}

/// Functional grouping used for ordering and filtering the registry
#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, Hash, TS, EnumString, Display,
)]
#[sqlx(type_name = "agent_cluster", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[ts(export, export_to = "agents/")]
pub enum AgentCluster {
    SkillDev,
    OpsHr,
    Engagement,
    Orchestration,
    Admin,
}

/// `running` is written at start, every other value exactly once at the end
#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "run_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[ts(export, export_to = "agents/")]
pub enum RunStatus {
    Running,
    #[default]
    Success,
    Partial,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    /// Handlers may report `running`; it is recorded as `success`
    pub fn finalized(self) -> Self {
        match self {
            RunStatus::Running => RunStatus::Success,
            other => other,
        }
    }
}

/// What caused a run
#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display,
)]
#[sqlx(type_name = "trigger_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[ts(export, export_to = "agents/")]
pub enum TriggerType {
    Cron,
    Event,
    Manual,
    Agent,
}

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "risk_level", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[ts(export, export_to = "agents/")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, Hash, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "proposal_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[ts(export, export_to = "agents/")]
pub enum ProposalStatus {
    #[default]
    Pending,
    AutoApproved,
    Approved,
    Rejected,
    Applied,
    Expired,
}

impl ProposalStatus {
    pub const ALL: [ProposalStatus; 6] = [
        ProposalStatus::Pending,
        ProposalStatus::AutoApproved,
        ProposalStatus::Approved,
        ProposalStatus::Rejected,
        ProposalStatus::Applied,
        ProposalStatus::Expired,
    ];

    /// Approved by a human or by the supervisor, side effect not yet applied
    pub fn is_approved(self) -> bool {
        matches!(self, ProposalStatus::Approved | ProposalStatus::AutoApproved)
    }
}

/// Row of `agent_registry`
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export, export_to = "agents/")]
pub struct Agent {
    pub id: String,
    pub agent_id: String,
    pub display_name: String,
    pub cluster: AgentCluster,
    pub description: Option<String>,
    pub status: AgentStatus,
    pub schedule_cron: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<RunStatus>,
    #[ts(type = "number | null")]
    pub last_run_duration_ms: Option<i64>,
    #[ts(type = "number")]
    pub consecutive_errors: i64,
    pub last_error_message: Option<String>,
    #[ts(type = "number")]
    pub daily_token_budget: i64,
    #[ts(type = "number")]
    pub daily_tokens_used: i64,
    pub budget_reset_at: DateTime<Utc>,
    #[ts(type = "Record<string, unknown>")]
    pub config: Json<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Fraction of today's token budget already spent (0 when no budget is set)
    pub fn budget_utilization(&self) -> f64 {
        if self.daily_token_budget <= 0 {
            return 0.0;
        }
        self.daily_tokens_used as f64 / self.daily_token_budget as f64
    }
}

/// Input for registering a new agent
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "agents/")]
pub struct NewAgent {
    pub agent_id: String,
    pub display_name: String,
    pub cluster: AgentCluster,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default)]
    pub schedule_cron: Option<String>,
    #[serde(default)]
    #[ts(type = "number | null")]
    pub daily_token_budget: Option<i64>,
    #[serde(default)]
    #[ts(type = "Record<string, unknown> | null")]
    pub config: Option<Value>,
}

/// Row of `agent_runs`
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export, export_to = "agents/")]
pub struct AgentRun {
    pub id: String,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub trigger_type: TriggerType,
    pub trigger_source: Option<String>,
    #[ts(type = "number")]
    pub proposals_created: i64,
    #[ts(type = "number")]
    pub proposals_auto_approved: i64,
    #[ts(type = "number")]
    pub tokens_used: i64,
    pub cost_usd: f64,
    pub error_message: Option<String>,
    #[ts(type = "Record<string, unknown>")]
    pub metadata: Json<Value>,
}

/// Row of `agent_proposals`
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export, export_to = "agents/")]
pub struct Proposal {
    pub id: String,
    pub agent_id: String,
    pub proposal_type: String,
    pub title: String,
    pub summary: Option<String>,
    #[ts(type = "Record<string, unknown>")]
    pub detail: Json<Value>,
    pub target_employee_id: Option<String>,
    pub target_entity_type: Option<String>,
    pub target_entity_id: Option<String>,
    pub risk_level: RiskLevel,
    pub status: ProposalStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Proposal {
    /// String field from `detail`, ignoring blanks
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.detail
            .0
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

/// Input for creating a proposal
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProposal {
    pub agent_id: String,
    pub proposal_type: String,
    pub title: String,
    pub summary: Option<String>,
    pub detail: Value,
    pub target_employee_id: Option<String>,
    pub target_entity_type: Option<String>,
    pub target_entity_id: Option<String>,
    pub risk_level: RiskLevel,
    pub expires_in_hours: Option<i64>,
}
