//! CRUD over `agent_registry`

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite};

use super::types::{Agent, AgentCluster, AgentStatus, NewAgent, RunStatus};
use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::scheduler::cron_expr;

/// Budget given to agents registered without one
pub const DEFAULT_DAILY_TOKEN_BUDGET: i64 = 100_000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentFilter {
    pub status: Option<AgentStatus>,
    pub cluster: Option<AgentCluster>,
}

pub async fn get_agent(db: &Database, agent_id: &str) -> AppResult<Option<Agent>> {
    let agent = sqlx::query_as::<_, Agent>("SELECT * FROM agent_registry WHERE agent_id = ?")
        .bind(agent_id)
        .fetch_optional(db.pool())
        .await?;
    Ok(agent)
}

/// Agents ordered by cluster, then display name
pub async fn list_agents(db: &Database, filter: &AgentFilter) -> AppResult<Vec<Agent>> {
    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM agent_registry WHERE 1 = 1");
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status);
    }
    if let Some(cluster) = filter.cluster {
        query.push(" AND cluster = ").push_bind(cluster);
    }
    query.push(" ORDER BY cluster, display_name");

    let agents = query.build_query_as::<Agent>().fetch_all(db.pool()).await?;
    Ok(agents)
}

pub async fn register_agent(db: &Database, new: NewAgent, now: DateTime<Utc>) -> AppResult<Agent> {
    if new.agent_id.trim().is_empty() {
        return Err(AppError::invalid_params("agent_id is required"));
    }
    if let Some(expr) = new.schedule_cron.as_deref() {
        cron_expr::validate(expr)?;
    }
    let config = match new.config {
        Some(Value::Object(map)) => Value::Object(map),
        Some(Value::Null) | None => Value::Object(Default::default()),
        Some(_) => return Err(AppError::invalid_params("config must be a JSON object")),
    };

    if get_agent(db, &new.agent_id).await?.is_some() {
        return Err(AppError::conflict(format!(
            "Agent \"{}\" is already registered",
            new.agent_id
        )));
    }

    sqlx::query(
        "INSERT INTO agent_registry (id, agent_id, display_name, cluster, description, status, \
         schedule_cron, daily_token_budget, daily_tokens_used, budget_reset_at, config, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&new.agent_id)
    .bind(&new.display_name)
    .bind(new.cluster)
    .bind(&new.description)
    .bind(new.status)
    .bind(&new.schedule_cron)
    .bind(new.daily_token_budget.unwrap_or(DEFAULT_DAILY_TOKEN_BUDGET))
    .bind(now)
    .bind(Json(config))
    .bind(now)
    .bind(now)
    .execute(db.pool())
    .await?;

    tracing::info!(agent_id = %new.agent_id, cluster = %new.cluster, "Agent registered");

    get_agent(db, &new.agent_id)
        .await?
        .ok_or_else(|| AppError::agent_not_found(&new.agent_id))
}

/// Change an agent's status. Resuming an agent also clears its error streak
/// so the supervisor does not pause it again straight away.
pub async fn update_agent_status(
    db: &Database,
    agent_id: &str,
    status: AgentStatus,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    let result = if status == AgentStatus::Active {
        sqlx::query(
            "UPDATE agent_registry SET status = ?, consecutive_errors = 0, last_error_message = NULL, \
             updated_at = ? WHERE agent_id = ?",
        )
        .bind(status)
        .bind(now)
        .bind(agent_id)
        .execute(db.pool())
        .await?
    } else {
        sqlx::query("UPDATE agent_registry SET status = ?, updated_at = ? WHERE agent_id = ?")
            .bind(status)
            .bind(now)
            .bind(agent_id)
            .execute(db.pool())
            .await?
    };

    let changed = result.rows_affected() > 0;
    if changed {
        tracing::info!(agent_id, %status, "Agent status updated");
    }
    Ok(changed)
}

/// Record the outcome of the latest run
pub async fn update_agent_last_run(
    db: &Database,
    agent_id: &str,
    status: RunStatus,
    duration_ms: i64,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let status = status.finalized();
    if status == RunStatus::Error {
        sqlx::query(
            "UPDATE agent_registry SET last_run_at = ?, last_run_status = ?, last_run_duration_ms = ?, \
             consecutive_errors = consecutive_errors + 1, last_error_message = ?, updated_at = ? \
             WHERE agent_id = ?",
        )
        .bind(now)
        .bind(status)
        .bind(duration_ms)
        .bind(error)
        .bind(now)
        .bind(agent_id)
        .execute(db.pool())
        .await?;
    } else {
        sqlx::query(
            "UPDATE agent_registry SET last_run_at = ?, last_run_status = ?, last_run_duration_ms = ?, \
             consecutive_errors = 0, last_error_message = NULL, updated_at = ? WHERE agent_id = ?",
        )
        .bind(now)
        .bind(status)
        .bind(duration_ms)
        .bind(now)
        .bind(agent_id)
        .execute(db.pool())
        .await?;
    }
    Ok(())
}

/// Shallow-merge `patch` into the agent's config. `false` when the agent is unknown.
pub async fn update_agent_config(
    db: &Database,
    agent_id: &str,
    patch: &Value,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    let Value::Object(patch) = patch else {
        return Err(AppError::invalid_params("config patch must be a JSON object"));
    };
    let Some(agent) = get_agent(db, agent_id).await? else {
        return Ok(false);
    };

    let mut merged = match agent.config.0 {
        Value::Object(map) => map,
        _ => Default::default(),
    };
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }

    let result = sqlx::query("UPDATE agent_registry SET config = ?, updated_at = ? WHERE agent_id = ?")
        .bind(Json(Value::Object(merged)))
        .bind(now)
        .bind(agent_id)
        .execute(db.pool())
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Replace (or clear) an agent's schedule
pub async fn update_agent_schedule(
    db: &Database,
    agent_id: &str,
    schedule_cron: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    let schedule_cron = schedule_cron.map(str::trim).filter(|s| !s.is_empty());
    if let Some(expr) = schedule_cron {
        cron_expr::validate(expr)?;
    }

    let result = sqlx::query("UPDATE agent_registry SET schedule_cron = ?, updated_at = ? WHERE agent_id = ?")
        .bind(schedule_cron)
        .bind(now)
        .bind(agent_id)
        .execute(db.pool())
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Zero today's usage for every agent that is not disabled
pub async fn reset_daily_budgets(db: &Database, now: DateTime<Utc>) -> AppResult<u64> {
    let result = sqlx::query(
        "UPDATE agent_registry SET daily_tokens_used = 0, budget_reset_at = ?, updated_at = ? \
         WHERE status != ?",
    )
    .bind(now)
    .bind(now)
    .bind(AgentStatus::Disabled)
    .execute(db.pool())
    .await?;

    let count = result.rows_affected();
    tracing::info!(count, "Daily token budgets reset");
    Ok(count)
}

/// Reset a single agent's usage (first LLM call on a new UTC day)
pub async fn reset_agent_budget(db: &Database, agent_id: &str, now: DateTime<Utc>) -> AppResult<()> {
    sqlx::query("UPDATE agent_registry SET daily_tokens_used = 0, budget_reset_at = ? WHERE agent_id = ?")
        .bind(now)
        .bind(agent_id)
        .execute(db.pool())
        .await?;
    Ok(())
}

/// Add tokens to today's usage
pub async fn add_tokens_used(db: &Database, agent_id: &str, tokens: i64) -> AppResult<()> {
    sqlx::query("UPDATE agent_registry SET daily_tokens_used = daily_tokens_used + ? WHERE agent_id = ?")
        .bind(tokens)
        .bind(agent_id)
        .execute(db.pool())
        .await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    pub(crate) fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 9, 30, 0).unwrap()
    }

    pub(crate) fn new_agent(agent_id: &str, cluster: AgentCluster, schedule: Option<&str>) -> NewAgent {
        NewAgent {
            agent_id: agent_id.to_string(),
            display_name: agent_id.replace('_', " "),
            cluster,
            description: None,
            status: AgentStatus::Active,
            schedule_cron: schedule.map(str::to_string),
            daily_token_budget: None,
            config: None,
        }
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let db = Database::in_memory().await.unwrap();
        let agent = register_agent(&db, new_agent("gap_analyzer", AgentCluster::SkillDev, Some("0 6 * * 1")), now())
            .await
            .unwrap();

        assert_eq!(agent.status, AgentStatus::Active);
        assert_eq!(agent.daily_token_budget, DEFAULT_DAILY_TOKEN_BUDGET);
        assert_eq!(agent.config.0, json!({}));
        assert_eq!(agent.budget_reset_at, now());

        assert!(get_agent(&db, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_bad_cron() {
        let db = Database::in_memory().await.unwrap();
        register_agent(&db, new_agent("hr_auditor", AgentCluster::OpsHr, None), now())
            .await
            .unwrap();

        let dup = register_agent(&db, new_agent("hr_auditor", AgentCluster::OpsHr, None), now()).await;
        assert_eq!(dup.unwrap_err().code, crate::error::ErrorCode::Conflict);

        let bad = register_agent(&db, new_agent("other", AgentCluster::OpsHr, Some("* * *")), now()).await;
        assert_eq!(bad.unwrap_err().code, crate::error::ErrorCode::InvalidSchedule);
    }

    #[tokio::test]
    async fn test_list_ordering_and_filters() {
        let db = Database::in_memory().await.unwrap();
        register_agent(&db, new_agent("zeta", AgentCluster::SkillDev, None), now()).await.unwrap();
        register_agent(&db, new_agent("alpha", AgentCluster::SkillDev, None), now()).await.unwrap();
        register_agent(&db, new_agent("pulse", AgentCluster::Engagement, None), now()).await.unwrap();
        update_agent_status(&db, "zeta", AgentStatus::Paused, now()).await.unwrap();

        let all = list_agents(&db, &AgentFilter::default()).await.unwrap();
        let ids: Vec<_> = all.iter().map(|a| a.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["pulse", "alpha", "zeta"]);

        let active = list_agents(
            &db,
            &AgentFilter { status: Some(AgentStatus::Active), cluster: Some(AgentCluster::SkillDev) },
        )
        .await
        .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].agent_id, "alpha");
    }

    #[tokio::test]
    async fn test_resume_clears_error_streak() {
        let db = Database::in_memory().await.unwrap();
        register_agent(&db, new_agent("payroll_watchdog", AgentCluster::OpsHr, None), now())
            .await
            .unwrap();

        update_agent_last_run(&db, "payroll_watchdog", RunStatus::Error, 120, Some("boom"), now())
            .await
            .unwrap();
        update_agent_last_run(&db, "payroll_watchdog", RunStatus::Error, 80, Some("boom again"), now())
            .await
            .unwrap();
        let agent = get_agent(&db, "payroll_watchdog").await.unwrap().unwrap();
        assert_eq!(agent.consecutive_errors, 2);
        assert_eq!(agent.last_error_message.as_deref(), Some("boom again"));
        assert_eq!(agent.last_run_status, Some(RunStatus::Error));

        assert!(update_agent_status(&db, "payroll_watchdog", AgentStatus::Paused, now()).await.unwrap());
        let paused = get_agent(&db, "payroll_watchdog").await.unwrap().unwrap();
        assert_eq!(paused.consecutive_errors, 2);

        assert!(update_agent_status(&db, "payroll_watchdog", AgentStatus::Active, now()).await.unwrap());
        let resumed = get_agent(&db, "payroll_watchdog").await.unwrap().unwrap();
        assert_eq!(resumed.consecutive_errors, 0);
        assert!(resumed.last_error_message.is_none());

        assert!(!update_agent_status(&db, "nobody", AgentStatus::Active, now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_successful_run_resets_streak_and_running_is_success() {
        let db = Database::in_memory().await.unwrap();
        register_agent(&db, new_agent("role_mapper", AgentCluster::SkillDev, None), now())
            .await
            .unwrap();
        update_agent_last_run(&db, "role_mapper", RunStatus::Error, 10, Some("x"), now())
            .await
            .unwrap();
        update_agent_last_run(&db, "role_mapper", RunStatus::Running, 10, None, now())
            .await
            .unwrap();

        let agent = get_agent(&db, "role_mapper").await.unwrap().unwrap();
        assert_eq!(agent.last_run_status, Some(RunStatus::Success));
        assert_eq!(agent.consecutive_errors, 0);
        assert_eq!(agent.last_run_duration_ms, Some(10));
        assert_eq!(agent.last_run_at, Some(now()));
    }

    #[tokio::test]
    async fn test_config_shallow_merge() {
        let db = Database::in_memory().await.unwrap();
        let mut seed = new_agent("skill_scout", AgentCluster::SkillDev, None);
        seed.config = Some(json!({"sources": ["avma"], "nested": {"a": 1}}));
        register_agent(&db, seed, now()).await.unwrap();

        let merged = update_agent_config(&db, "skill_scout", &json!({"nested": {"b": 2}, "limit": 5}), now())
            .await
            .unwrap();
        assert!(merged);

        let agent = get_agent(&db, "skill_scout").await.unwrap().unwrap();
        assert_eq!(agent.config.0, json!({"sources": ["avma"], "nested": {"b": 2}, "limit": 5}));

        assert!(!update_agent_config(&db, "missing", &json!({"a": 1}), now()).await.unwrap());
        assert!(update_agent_config(&db, "skill_scout", &json!([1]), now()).await.is_err());
    }

    #[tokio::test]
    async fn test_schedule_update_is_validated() {
        let db = Database::in_memory().await.unwrap();
        register_agent(&db, new_agent("course_architect", AgentCluster::SkillDev, None), now())
            .await
            .unwrap();

        assert!(update_agent_schedule(&db, "course_architect", Some("0 3 * * *"), now()).await.unwrap());
        assert!(update_agent_schedule(&db, "course_architect", Some("0 25 * * *"), now()).await.is_err());
        let agent = get_agent(&db, "course_architect").await.unwrap().unwrap();
        assert_eq!(agent.schedule_cron.as_deref(), Some("0 3 * * *"));

        assert!(update_agent_schedule(&db, "course_architect", None, now()).await.unwrap());
        let cleared = get_agent(&db, "course_architect").await.unwrap().unwrap();
        assert!(cleared.schedule_cron.is_none());
    }

    #[tokio::test]
    async fn test_reset_daily_budgets_skips_disabled() {
        let db = Database::in_memory().await.unwrap();
        register_agent(&db, new_agent("a", AgentCluster::Admin, None), now()).await.unwrap();
        register_agent(&db, new_agent("b", AgentCluster::Admin, None), now()).await.unwrap();
        add_tokens_used(&db, "a", 500).await.unwrap();
        add_tokens_used(&db, "b", 700).await.unwrap();
        update_agent_status(&db, "b", AgentStatus::Disabled, now()).await.unwrap();

        let later = now() + Duration::days(1);
        assert_eq!(reset_daily_budgets(&db, later).await.unwrap(), 1);

        let a = get_agent(&db, "a").await.unwrap().unwrap();
        let b = get_agent(&db, "b").await.unwrap().unwrap();
        assert_eq!(a.daily_tokens_used, 0);
        assert_eq!(a.budget_reset_at, later);
        assert_eq!(b.daily_tokens_used, 700);
    }
}
