//! YAML seed for the agent registry

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::registry;
use super::types::NewAgent;
use crate::db::Database;
use crate::error::{AppError, AppResult, ErrorCode};

/// Registry shipped with the server, used when no seed file is configured
const BUILTIN_AGENTS: &str = include_str!("../../agents.yaml");

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    agents: Vec<NewAgent>,
}

pub fn parse_seed(yaml: &str) -> AppResult<Vec<NewAgent>> {
    let file: SeedFile = serde_yaml::from_str(yaml)?;
    Ok(file.agents)
}

/// Register every seeded agent that is not in the database yet.
/// Returns how many were inserted.
pub async fn seed_agents(db: &Database, path: Option<&Path>, now: DateTime<Utc>) -> AppResult<usize> {
    let agents = match path {
        Some(path) => {
            let yaml = tokio::fs::read_to_string(path).await.map_err(|e| {
                AppError::config(format!("Failed to read agents file {}: {}", path.display(), e))
            })?;
            parse_seed(&yaml)?
        }
        None => parse_seed(BUILTIN_AGENTS)?,
    };

    let mut inserted = 0;
    for agent in agents {
        let agent_id = agent.agent_id.clone();
        match registry::register_agent(db, agent, now).await {
            Ok(_) => inserted += 1,
            Err(err) if err.code == ErrorCode::Conflict => {
                tracing::debug!(agent_id = %agent_id, "Agent already registered");
            }
            Err(err) => return Err(err.with_details(format!("while seeding agent {}", agent_id))),
        }
    }

    tracing::info!(inserted, "Agent registry seeded");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::registry::tests::now;
    use crate::agents::registry::{get_agent, list_agents, DEFAULT_DAILY_TOKEN_BUDGET};
    use crate::agents::types::{AgentCluster, AgentStatus};
    use crate::agents::supervisor::SupervisorAgent;
    use std::io::Write;

    #[test]
    fn test_builtin_seed_parses() {
        let agents = parse_seed(BUILTIN_AGENTS).unwrap();
        assert_eq!(agents.len(), 15);
        let active: Vec<_> = agents
            .iter()
            .filter(|a| a.status == AgentStatus::Active)
            .map(|a| a.agent_id.as_str())
            .collect();
        assert_eq!(active, vec![SupervisorAgent::AGENT_ID]);
        for agent in &agents {
            if let Some(expr) = &agent.schedule_cron {
                crate::scheduler::cron_expr::validate(expr).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        assert_eq!(seed_agents(&db, None, now()).await.unwrap(), 15);
        assert_eq!(seed_agents(&db, None, now()).await.unwrap(), 0);
        assert_eq!(list_agents(&db, &Default::default()).await.unwrap().len(), 15);

        let tracker = get_agent(&db, "compliance_tracker").await.unwrap().unwrap();
        assert_eq!(tracker.cluster, AgentCluster::OpsHr);
        assert_eq!(tracker.config.0["warning_days"][1], 30);
        assert_eq!(tracker.daily_token_budget, DEFAULT_DAILY_TOKEN_BUDGET);
    }

    #[tokio::test]
    async fn test_seed_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "agents:\n  - agent_id: payroll_watchdog\n    display_name: Payroll Watchdog\n    cluster: ops_hr\n    schedule_cron: \"0 3 * * *\"\n    daily_token_budget: 5000"
        )
        .unwrap();

        let db = Database::in_memory().await.unwrap();
        assert_eq!(seed_agents(&db, Some(file.path()), now()).await.unwrap(), 1);

        let agent = get_agent(&db, "payroll_watchdog").await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Active);
        assert_eq!(agent.daily_token_budget, 5000);
    }

    #[tokio::test]
    async fn test_bad_seed_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "agents:\n  - agent_id: broken\n    display_name: Broken\n    cluster: nowhere").unwrap();

        let db = Database::in_memory().await.unwrap();
        let err = seed_agents(&db, Some(file.path()), now()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigError);

        let missing = seed_agents(&db, Some(Path::new("/nonexistent/agents.yaml")), now())
            .await
            .unwrap_err();
        assert_eq!(missing.code, ErrorCode::ConfigError);
    }
}
