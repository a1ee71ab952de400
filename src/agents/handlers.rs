//! Agent handler registry and the run lifecycle around a handler call

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

use super::registry;
use super::runs::{self, RunCompletion};
use super::supervisor::SupervisorAgent;
use super::types::{AgentStatus, RunStatus, TriggerType};
use crate::error::{AppError, AppResult};
use crate::events::AgentEventKind;
use crate::services::Services;

const EVENT_SOURCE: &str = "agent_runner";

/// Everything a handler needs for one run
#[derive(Clone)]
pub struct RunContext {
    pub agent_id: String,
    pub run_id: String,
    pub trigger_type: TriggerType,
    pub trigger_source: Option<String>,
    pub config: Value,
    pub services: Services,
}

/// What a handler reports back
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub status: RunStatus,
    pub proposals_created: i64,
    pub proposals_auto_approved: i64,
    pub tokens_used: i64,
    pub cost_usd: f64,
    pub summary: String,
    pub metadata: Map<String, Value>,
}

impl RunOutcome {
    /// Metadata stored on the run row: the summary plus handler metadata
    fn run_metadata(&self) -> Value {
        let mut metadata = Map::new();
        metadata.insert("summary".to_string(), Value::String(self.summary.clone()));
        for (key, value) in &self.metadata {
            metadata.insert(key.clone(), value.clone());
        }
        Value::Object(metadata)
    }
}

#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn run(&self, ctx: &RunContext) -> AppResult<RunOutcome>;
}

/// Maps agent ids to their handlers
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn AgentHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the handlers shipped in this crate
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(SupervisorAgent::AGENT_ID, Arc::new(SupervisorAgent));
        registry
    }

    pub fn register(&mut self, agent_id: &str, handler: Arc<dyn AgentHandler>) {
        self.handlers.insert(agent_id.to_string(), handler);
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<dyn AgentHandler>> {
        self.handlers.get(agent_id).cloned()
    }

    pub fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Fail a run that never reached its handler
async fn abort_run(services: &Services, agent_id: &str, run_id: &str, err: AppError) -> AppResult<RunOutcome> {
    runs::fail_run(&services.db, run_id, &err.message, None, Utc::now()).await?;
    services.events.emit_kind(
        AgentEventKind::RunFailed {
            agent_id: agent_id.to_string(),
            run_id: Some(run_id.to_string()),
            error: err.message.clone(),
            duration_ms: 0,
        },
        EVENT_SOURCE,
    );
    tracing::warn!(agent_id, run_id, error = %err.message, "Run aborted before handler");
    Err(err)
}

/// Full lifecycle of one run: start row, checks, handler call, terminal
/// write, registry bookkeeping and events.
pub async fn execute_agent_run(
    services: &Services,
    agent_id: &str,
    trigger_type: TriggerType,
    trigger_source: Option<&str>,
) -> AppResult<RunOutcome> {
    let started = Instant::now();
    let db = &services.db;

    let run_id = runs::start_run(db, agent_id, trigger_type, trigger_source, Utc::now()).await?;
    services.events.emit_kind(
        AgentEventKind::RunStarted {
            agent_id: agent_id.to_string(),
            run_id: run_id.clone(),
            trigger_type,
            trigger_source: trigger_source.map(str::to_string),
        },
        EVENT_SOURCE,
    );

    let Some(agent) = registry::get_agent(db, agent_id).await? else {
        let err = AppError::not_found(format!("Agent \"{}\" not found in registry", agent_id));
        return abort_run(services, agent_id, &run_id, err).await;
    };

    if agent.status != AgentStatus::Active {
        let err = AppError::invalid_state(format!("Agent \"{}\" is {}, skipping", agent_id, agent.status));
        return abort_run(services, agent_id, &run_id, err).await;
    }

    let Some(handler) = services.handlers.get(agent_id) else {
        let err = AppError::not_found(format!("No handler registered for agent \"{}\"", agent_id));
        return abort_run(services, agent_id, &run_id, err).await;
    };

    let ctx = RunContext {
        agent_id: agent_id.to_string(),
        run_id: run_id.clone(),
        trigger_type,
        trigger_source: trigger_source.map(str::to_string),
        config: agent.config.0.clone(),
        services: services.clone(),
    };

    let result = handler.run(&ctx).await;
    let duration_ms = started.elapsed().as_millis() as i64;

    match result {
        Ok(mut outcome) => {
            outcome.status = outcome.status.finalized();
            let completion = RunCompletion {
                status: Some(outcome.status),
                proposals_created: outcome.proposals_created,
                proposals_auto_approved: outcome.proposals_auto_approved,
                tokens_used: outcome.tokens_used,
                cost_usd: outcome.cost_usd,
                metadata: Some(outcome.run_metadata()),
            };
            runs::complete_run(db, &run_id, completion, Utc::now()).await?;
            registry::update_agent_last_run(db, agent_id, outcome.status, duration_ms, None, Utc::now()).await?;

            tracing::info!(
                agent_id,
                run_id = %run_id,
                status = %outcome.status,
                proposals = outcome.proposals_created,
                tokens = outcome.tokens_used,
                duration_ms,
                "Run completed"
            );
            services.events.emit_kind(
                AgentEventKind::RunCompleted {
                    agent_id: agent_id.to_string(),
                    run_id,
                    status: outcome.status,
                    duration_ms,
                    proposals_created: outcome.proposals_created,
                    tokens_used: outcome.tokens_used,
                },
                EVENT_SOURCE,
            );
            Ok(outcome)
        }
        Err(err) => {
            runs::fail_run(db, &run_id, &err.message, None, Utc::now()).await?;
            registry::update_agent_last_run(db, agent_id, RunStatus::Error, duration_ms, Some(&err.message), Utc::now())
                .await?;

            tracing::error!(agent_id, run_id = %run_id, duration_ms, error = %err, "Run failed");
            services.events.emit_kind(
                AgentEventKind::RunFailed {
                    agent_id: agent_id.to_string(),
                    run_id: Some(run_id),
                    error: err.message.clone(),
                    duration_ms,
                },
                EVENT_SOURCE,
            );
            Err(err)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agents::registry::tests::new_agent;
    use crate::agents::types::AgentCluster;
    use crate::services::tests::test_services;
    use serde_json::json;

    /// Handler returning a fixed outcome or error
    pub(crate) struct Scripted(pub(crate) Result<RunOutcome, String>);

    #[async_trait]
    impl AgentHandler for Scripted {
        async fn run(&self, ctx: &RunContext) -> AppResult<RunOutcome> {
            assert_eq!(ctx.config["threshold"], 3);
            self.0.clone().map_err(AppError::unknown)
        }
    }

    pub(crate) fn scripted_registry(agent_id: &str, result: Result<RunOutcome, String>) -> HandlerRegistry {
        let mut registry = HandlerRegistry::with_builtin();
        registry.register(agent_id, Arc::new(Scripted(result)));
        registry
    }

    async fn services_with(result: Result<RunOutcome, String>) -> Services {
        let services = test_services().await.with_handlers(scripted_registry("gap_analyzer", result));
        let mut agent = new_agent("gap_analyzer", AgentCluster::SkillDev, Some("0 6 * * 1"));
        agent.config = Some(json!({"threshold": 3}));
        registry::register_agent(&services.db, agent, Utc::now()).await.unwrap();
        services
    }

    #[test]
    fn test_registered_ids_sorted() {
        let mut registry = HandlerRegistry::with_builtin();
        registry.register("attendance_monitor", Arc::new(Scripted(Ok(RunOutcome::default()))));
        assert_eq!(registry.registered_ids(), vec!["attendance_monitor", "supervisor_agent"]);
        assert!(registry.get("payroll_watchdog").is_none());
    }

    #[tokio::test]
    async fn test_successful_run_is_recorded() {
        let mut outcome = RunOutcome {
            status: RunStatus::Running,
            proposals_created: 2,
            tokens_used: 150,
            summary: "Found 2 gaps".to_string(),
            ..RunOutcome::default()
        };
        outcome.metadata.insert("employees_scanned".to_string(), json!(12));
        let services = services_with(Ok(outcome)).await;
        let mut events = services.events.subscribe();

        let result = execute_agent_run(&services, "gap_analyzer", TriggerType::Manual, Some("admin"))
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Success);

        let run = &runs::list_runs(&services.db, &Default::default()).await.unwrap()[0];
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.proposals_created, 2);
        assert_eq!(run.metadata.0["summary"], "Found 2 gaps");
        assert_eq!(run.metadata.0["employees_scanned"], 12);
        assert_eq!(run.trigger_source.as_deref(), Some("admin"));

        let agent = registry::get_agent(&services.db, "gap_analyzer").await.unwrap().unwrap();
        assert_eq!(agent.last_run_status, Some(RunStatus::Success));
        assert!(agent.last_run_at.is_some());

        assert!(matches!(events.recv().await.unwrap().event, AgentEventKind::RunStarted { .. }));
        assert!(matches!(
            events.recv().await.unwrap().event,
            AgentEventKind::RunCompleted { status: RunStatus::Success, proposals_created: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_handler_error_fails_run_and_bumps_streak() {
        let services = services_with(Err("employees table unavailable".to_string())).await;

        let err = execute_agent_run(&services, "gap_analyzer", TriggerType::Cron, None)
            .await
            .unwrap_err();
        assert!(err.message.contains("employees table unavailable"));

        let run = &runs::list_runs(&services.db, &Default::default()).await.unwrap()[0];
        assert_eq!(run.status, RunStatus::Error);
        assert!(run.finished_at.is_some());

        let agent = registry::get_agent(&services.db, "gap_analyzer").await.unwrap().unwrap();
        assert_eq!(agent.consecutive_errors, 1);
        assert_eq!(agent.last_run_status, Some(RunStatus::Error));
    }

    #[tokio::test]
    async fn test_preconditions_fail_run_without_touching_registry() {
        let services = services_with(Ok(RunOutcome::default())).await;

        let missing = execute_agent_run(&services, "ghost", TriggerType::Manual, None).await.unwrap_err();
        assert_eq!(missing.code, crate::error::ErrorCode::NotFound);

        registry::update_agent_status(&services.db, "gap_analyzer", AgentStatus::Paused, Utc::now())
            .await
            .unwrap();
        let paused = execute_agent_run(&services, "gap_analyzer", TriggerType::Manual, None)
            .await
            .unwrap_err();
        assert!(paused.message.contains("is paused"));

        let no_handler = new_agent("skill_scout", AgentCluster::SkillDev, None);
        registry::register_agent(&services.db, no_handler, Utc::now()).await.unwrap();
        let unhandled = execute_agent_run(&services, "skill_scout", TriggerType::Manual, None)
            .await
            .unwrap_err();
        assert!(unhandled.message.contains("No handler registered"));

        let all_runs = runs::list_runs(&services.db, &Default::default()).await.unwrap();
        assert_eq!(all_runs.len(), 3);
        assert!(all_runs.iter().all(|r| r.status == RunStatus::Error));

        let agent = registry::get_agent(&services.db, "gap_analyzer").await.unwrap().unwrap();
        assert!(agent.last_run_at.is_none());
        assert_eq!(agent.consecutive_errors, 0);
    }
}
