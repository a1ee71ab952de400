use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::agents::types::{AgentStatus, ProposalStatus, RiskLevel, RunStatus, TriggerType};

/// What happened, with the identifiers a dashboard needs to refresh
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "events/")]
pub enum AgentEventKind {
    RunStarted {
        agent_id: String,
        run_id: String,
        trigger_type: TriggerType,
        trigger_source: Option<String>,
    },
    RunCompleted {
        agent_id: String,
        run_id: String,
        status: RunStatus,
        #[ts(type = "number")]
        duration_ms: i64,
        #[ts(type = "number")]
        proposals_created: i64,
        #[ts(type = "number")]
        tokens_used: i64,
    },
    RunFailed {
        agent_id: String,
        run_id: Option<String>,
        error: String,
        #[ts(type = "number")]
        duration_ms: i64,
    },
    ProposalCreated {
        agent_id: String,
        proposal_id: String,
        proposal_type: String,
        risk_level: RiskLevel,
    },
    ProposalReviewed {
        proposal_id: String,
        status: ProposalStatus,
        reviewer: Option<String>,
    },
    AgentStatusChanged {
        agent_id: String,
        status: AgentStatus,
    },
}

/// Event envelope broadcast on the bus and streamed to WebSocket clients
#[derive(Clone, Debug, Serialize, Deserialize, TS)]
#[ts(export, export_to = "events/")]
pub struct AgentEvent {
    pub event: AgentEventKind,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl AgentEvent {
    pub fn new(event: AgentEventKind, source: &str) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
            source: source.to_string(),
        }
    }
}
