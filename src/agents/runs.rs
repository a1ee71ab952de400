//! Run bookkeeping over `agent_runs`
//!
//! A run row is inserted as `running` and receives exactly one terminal write;
//! later terminal writes are ignored and reported as `false`.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite};
use ts_rs::TS;

use super::registry::{self, AgentFilter};
use super::types::{AgentCluster, AgentRun, ProposalStatus, RunStatus, TriggerType};
use crate::db::Database;
use crate::error::{AppError, AppResult};

/// Default page size for run listings
pub const DEFAULT_RUN_LIMIT: i64 = 20;

/// Default stats window in days
pub const DEFAULT_STATS_DAYS: i64 = 7;

/// Longest stats window; larger requests are clamped
pub const MAX_STATS_DAYS: i64 = 3650;

/// Recent rows scanned when computing error streaks
pub const ERROR_STREAK_WINDOW: i64 = 200;

pub const STUCK_RUN_MESSAGE: &str = "Terminated by supervisor: exceeded time limit";

/// Counters and metadata recorded when a run completes
#[derive(Debug, Clone, Default)]
pub struct RunCompletion {
    pub status: Option<RunStatus>,
    pub proposals_created: i64,
    pub proposals_auto_approved: i64,
    pub tokens_used: i64,
    pub cost_usd: f64,
    pub metadata: Option<Value>,
}

/// Partial progress kept on a failed run
#[derive(Debug, Clone, Default)]
pub struct PartialResult {
    pub proposals_created: i64,
    pub tokens_used: i64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunFilter {
    pub agent_id: Option<String>,
    pub status: Option<RunStatus>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "agents/")]
pub struct RunStats {
    #[ts(type = "number")]
    pub total_runs: i64,
    #[ts(type = "number")]
    pub success_runs: i64,
    #[ts(type = "number")]
    pub error_runs: i64,
    #[ts(type = "number")]
    pub total_tokens: i64,
    pub total_cost: f64,
    #[ts(type = "number")]
    pub avg_duration_ms: i64,
}

/// Insert a `running` row and return its id
pub async fn start_run(
    db: &Database,
    agent_id: &str,
    trigger_type: TriggerType,
    trigger_source: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<String> {
    let run_id = uuid::Uuid::new_v4().to_string();

    sqlx::query(
        "INSERT INTO agent_runs (id, agent_id, started_at, status, trigger_type, trigger_source, metadata) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&run_id)
    .bind(agent_id)
    .bind(now)
    .bind(RunStatus::Running)
    .bind(trigger_type)
    .bind(trigger_source)
    .bind(Json(json!({})))
    .execute(db.pool())
    .await
    .map_err(|e| {
        tracing::error!(agent_id, error = %e, "Failed to start run");
        AppError::database(format!("Failed to start agent run for {}: {}", agent_id, e))
    })?;

    tracing::info!(agent_id, run_id = %run_id, %trigger_type, ?trigger_source, "Run started");
    Ok(run_id)
}

/// Terminal write for a finished run. `running` is stored as `success`.
pub async fn complete_run(
    db: &Database,
    run_id: &str,
    completion: RunCompletion,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    let status = completion.status.unwrap_or_default().finalized();

    let result = sqlx::query(
        "UPDATE agent_runs SET finished_at = ?, status = ?, proposals_created = ?, \
         proposals_auto_approved = ?, tokens_used = ?, cost_usd = ?, metadata = ? \
         WHERE id = ? AND status = ?",
    )
    .bind(now)
    .bind(status)
    .bind(completion.proposals_created)
    .bind(completion.proposals_auto_approved)
    .bind(completion.tokens_used)
    .bind(completion.cost_usd)
    .bind(Json(completion.metadata.unwrap_or_else(|| json!({}))))
    .bind(run_id)
    .bind(RunStatus::Running)
    .execute(db.pool())
    .await?;

    let written = result.rows_affected() > 0;
    if !written {
        tracing::warn!(run_id, "Run already finished, completion ignored");
    }
    Ok(written)
}

/// Terminal write for a failed run
pub async fn fail_run(
    db: &Database,
    run_id: &str,
    error_message: &str,
    partial: Option<PartialResult>,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    let partial = partial.unwrap_or_default();

    let result = sqlx::query(
        "UPDATE agent_runs SET finished_at = ?, status = ?, error_message = ?, proposals_created = ?, \
         tokens_used = ?, cost_usd = ? WHERE id = ? AND status = ?",
    )
    .bind(now)
    .bind(RunStatus::Error)
    .bind(error_message)
    .bind(partial.proposals_created)
    .bind(partial.tokens_used)
    .bind(partial.cost_usd)
    .bind(run_id)
    .bind(RunStatus::Running)
    .execute(db.pool())
    .await?;

    let written = result.rows_affected() > 0;
    if !written {
        tracing::warn!(run_id, "Run already finished, failure ignored");
    }
    Ok(written)
}

pub async fn get_run(db: &Database, run_id: &str) -> AppResult<Option<AgentRun>> {
    let run = sqlx::query_as::<_, AgentRun>("SELECT * FROM agent_runs WHERE id = ?")
        .bind(run_id)
        .fetch_optional(db.pool())
        .await?;
    Ok(run)
}

/// Newest runs first
pub async fn list_runs(db: &Database, filter: &RunFilter) -> AppResult<Vec<AgentRun>> {
    let limit = filter.limit.unwrap_or(DEFAULT_RUN_LIMIT).clamp(1, 500);

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM agent_runs WHERE 1 = 1");
    if let Some(agent_id) = &filter.agent_id {
        query.push(" AND agent_id = ").push_bind(agent_id.clone());
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status);
    }
    query.push(" ORDER BY started_at DESC LIMIT ").push_bind(limit);

    let runs = query.build_query_as::<AgentRun>().fetch_all(db.pool()).await?;
    Ok(runs)
}

/// Aggregate counters over runs started within the last `days`
pub async fn run_stats(
    db: &Database,
    agent_id: Option<&str>,
    days: i64,
    now: DateTime<Utc>,
) -> AppResult<RunStats> {
    let since = now - Duration::days(days.clamp(0, MAX_STATS_DAYS));

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM agent_runs WHERE started_at >= ");
    query.push_bind(since);
    if let Some(agent_id) = agent_id {
        query.push(" AND agent_id = ").push_bind(agent_id.to_string());
    }
    let runs = query.build_query_as::<AgentRun>().fetch_all(db.pool()).await?;

    let mut stats = RunStats {
        total_runs: runs.len() as i64,
        ..Default::default()
    };
    let mut total_duration = 0i64;
    let mut durations = 0i64;

    for run in &runs {
        stats.total_tokens += run.tokens_used;
        stats.total_cost += run.cost_usd;
        match run.status {
            RunStatus::Success => stats.success_runs += 1,
            RunStatus::Error => stats.error_runs += 1,
            _ => {}
        }
        if let Some(finished_at) = run.finished_at {
            total_duration += (finished_at - run.started_at).num_milliseconds();
            durations += 1;
        }
    }

    if durations > 0 {
        stats.avg_duration_ms = (total_duration as f64 / durations as f64).round() as i64;
    }
    Ok(stats)
}

/// Runs still `running` that started before `older_than`, as seen before the update
pub async fn fail_stuck_runs(
    db: &Database,
    older_than: DateTime<Utc>,
    now: DateTime<Utc>,
) -> AppResult<Vec<AgentRun>> {
    let stuck = sqlx::query_as::<_, AgentRun>(
        "SELECT * FROM agent_runs WHERE status = ? AND started_at < ? ORDER BY started_at",
    )
    .bind(RunStatus::Running)
    .bind(older_than)
    .fetch_all(db.pool())
    .await?;

    let mut killed = Vec::with_capacity(stuck.len());
    for run in stuck {
        if fail_run(db, &run.id, STUCK_RUN_MESSAGE, None, now).await? {
            tracing::warn!(agent_id = %run.agent_id, run_id = %run.id, "Stuck run terminated");
            killed.push(run);
        }
    }
    Ok(killed)
}

/// Per agent, how many of its most recent runs in a row ended in `error`
pub async fn error_streaks(db: &Database, limit: i64) -> AppResult<HashMap<String, i64>> {
    let rows: Vec<(String, RunStatus)> = sqlx::query_as(
        "SELECT agent_id, status FROM agent_runs ORDER BY started_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(db.pool())
    .await?;

    // Agents whose streak has been broken by a non-error run
    let mut settled: HashMap<String, bool> = HashMap::new();
    let mut streaks: HashMap<String, i64> = HashMap::new();

    for (agent_id, status) in rows {
        let done = settled.entry(agent_id.clone()).or_insert(false);
        let streak = streaks.entry(agent_id).or_insert(0);
        if *done {
            continue;
        }
        if status == RunStatus::Error {
            *streak += 1;
        } else {
            *done = true;
        }
    }
    Ok(streaks)
}

/// Whether any run succeeded at or after `since`
pub async fn has_recent_success(db: &Database, since: DateTime<Utc>) -> AppResult<bool> {
    let found: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM agent_runs WHERE status = ? AND started_at >= ? LIMIT 1",
    )
    .bind(RunStatus::Success)
    .bind(since)
    .fetch_optional(db.pool())
    .await?;
    Ok(found.is_some())
}

/// Days covered by the dashboard charts, today included
pub const CHART_DAYS: i64 = 7;

/// One named line or bar group of a chart
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export, export_to = "agents/")]
pub struct ChartSeries<T> {
    pub name: String,
    pub data: Vec<T>,
}

/// Today's token spend of one agent
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export, export_to = "agents/")]
pub struct AgentTokenUsage {
    pub agent_id: String,
    pub name: String,
    pub cluster: AgentCluster,
    #[ts(type = "number")]
    pub used: i64,
    #[ts(type = "number")]
    pub budget: i64,
    #[ts(type = "number")]
    pub pct: i64,
}

/// Dashboard chart data over the last `CHART_DAYS` days
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "agents/")]
pub struct DashboardCharts {
    /// `YYYY-MM-DD` axis, oldest first
    pub days: Vec<String>,
    /// Cost per cluster per day
    pub cost_series: Vec<ChartSeries<f64>>,
    /// Success, error and partial runs per day
    #[ts(type = "Array<ChartSeries<number>>")]
    pub run_series: Vec<ChartSeries<i64>>,
    pub agent_tokens: Vec<AgentTokenUsage>,
    #[ts(type = "Record<string, Record<string, number>>")]
    pub proposals_by_agent: BTreeMap<String, BTreeMap<String, i64>>,
    pub clusters: Vec<AgentCluster>,
}

fn round_cost(cost: f64) -> f64 {
    (cost * 10_000.0).round() / 10_000.0
}

/// Aggregate runs, budgets and proposals for the dashboard charts
pub async fn dashboard_charts(db: &Database, now: DateTime<Utc>) -> AppResult<DashboardCharts> {
    let since = now - Duration::days(CHART_DAYS);
    let days: Vec<NaiveDate> = (0..CHART_DAYS)
        .rev()
        .map(|i| (now - Duration::days(i)).date_naive())
        .collect();

    let runs: Vec<AgentRun> =
        sqlx::query_as("SELECT * FROM agent_runs WHERE started_at >= ? ORDER BY started_at")
            .bind(since)
            .fetch_all(db.pool())
            .await?;
    let agents = registry::list_agents(db, &AgentFilter::default()).await?;
    let cluster_of: HashMap<&str, AgentCluster> =
        agents.iter().map(|a| (a.agent_id.as_str(), a.cluster)).collect();

    let mut clusters: Vec<AgentCluster> = Vec::new();
    for agent in &agents {
        if !clusters.contains(&agent.cluster) {
            clusters.push(agent.cluster);
        }
    }

    // Per day: cost by cluster and [success, error, partial] counts
    let mut daily_cost: HashMap<(NaiveDate, AgentCluster), f64> = HashMap::new();
    let mut daily_status: HashMap<NaiveDate, [i64; 3]> = HashMap::new();
    for run in &runs {
        let day = run.started_at.date_naive();
        if !days.contains(&day) {
            continue;
        }
        if let Some(cluster) = cluster_of.get(run.agent_id.as_str()) {
            *daily_cost.entry((day, *cluster)).or_default() += run.cost_usd;
        }
        let slot = match run.status {
            RunStatus::Success => 0,
            RunStatus::Error => 1,
            RunStatus::Partial => 2,
            RunStatus::Running => continue,
        };
        daily_status.entry(day).or_default()[slot] += 1;
    }

    let cost_series = clusters
        .iter()
        .map(|cluster| ChartSeries {
            name: cluster.to_string(),
            data: days
                .iter()
                .map(|day| round_cost(daily_cost.get(&(*day, *cluster)).copied().unwrap_or(0.0)))
                .collect(),
        })
        .collect();

    let run_series = ["Success", "Error", "Partial"]
        .iter()
        .enumerate()
        .map(|(slot, name)| ChartSeries {
            name: name.to_string(),
            data: days
                .iter()
                .map(|day| daily_status.get(day).map_or(0, |counts| counts[slot]))
                .collect(),
        })
        .collect();

    let agent_tokens = agents
        .iter()
        .map(|a| AgentTokenUsage {
            agent_id: a.agent_id.clone(),
            name: a.display_name.clone(),
            cluster: a.cluster,
            used: a.daily_tokens_used,
            budget: a.daily_token_budget,
            pct: (a.budget_utilization() * 100.0).round() as i64,
        })
        .collect();

    let recent: Vec<(String, ProposalStatus)> =
        sqlx::query_as("SELECT agent_id, status FROM agent_proposals WHERE created_at >= ?")
            .bind(since)
            .fetch_all(db.pool())
            .await?;
    let mut proposals_by_agent: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
    for (agent_id, status) in recent {
        *proposals_by_agent
            .entry(agent_id)
            .or_default()
            .entry(status.to_string())
            .or_default() += 1;
    }

    Ok(DashboardCharts {
        days: days.iter().map(|d| d.format("%Y-%m-%d").to_string()).collect(),
        cost_series,
        run_series,
        agent_tokens,
        proposals_by_agent,
        clusters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::registry::tests::now;

    async fn seeded_run(db: &Database, agent_id: &str, at: DateTime<Utc>, status: RunStatus) -> String {
        let id = start_run(db, agent_id, TriggerType::Cron, Some("agent-dispatcher"), at)
            .await
            .unwrap();
        match status {
            RunStatus::Running => {}
            RunStatus::Error => {
                fail_run(db, &id, "failed", None, at + Duration::seconds(2)).await.unwrap();
            }
            other => {
                complete_run(
                    db,
                    &id,
                    RunCompletion { status: Some(other), ..Default::default() },
                    at + Duration::seconds(2),
                )
                .await
                .unwrap();
            }
        }
        id
    }

    #[tokio::test]
    async fn test_lifecycle_written_once() {
        let db = Database::in_memory().await.unwrap();
        let run_id = start_run(&db, "gap_analyzer", TriggerType::Manual, None, now()).await.unwrap();

        let run = get_run(&db, &run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.finished_at.is_none());

        let completion = RunCompletion {
            status: Some(RunStatus::Partial),
            proposals_created: 3,
            tokens_used: 1200,
            cost_usd: 0.01,
            metadata: Some(json!({"summary": "done"})),
            ..Default::default()
        };
        assert!(complete_run(&db, &run_id, completion, now() + Duration::seconds(5)).await.unwrap());

        // Second terminal write changes nothing
        assert!(!fail_run(&db, &run_id, "late", None, now() + Duration::seconds(9)).await.unwrap());

        let run = get_run(&db, &run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Partial);
        assert_eq!(run.proposals_created, 3);
        assert_eq!(run.tokens_used, 1200);
        assert_eq!(run.metadata.0, json!({"summary": "done"}));
        assert!(run.error_message.is_none());
        assert_eq!(run.finished_at, Some(now() + Duration::seconds(5)));
    }

    #[tokio::test]
    async fn test_completion_defaults_and_coercion() {
        let db = Database::in_memory().await.unwrap();
        let a = start_run(&db, "a", TriggerType::Cron, None, now()).await.unwrap();
        let b = start_run(&db, "b", TriggerType::Cron, None, now()).await.unwrap();

        complete_run(&db, &a, RunCompletion::default(), now()).await.unwrap();
        complete_run(
            &db,
            &b,
            RunCompletion { status: Some(RunStatus::Running), ..Default::default() },
            now(),
        )
        .await
        .unwrap();

        assert_eq!(get_run(&db, &a).await.unwrap().unwrap().status, RunStatus::Success);
        assert_eq!(get_run(&db, &b).await.unwrap().unwrap().status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_fail_run_keeps_partial_counts() {
        let db = Database::in_memory().await.unwrap();
        let id = start_run(&db, "a", TriggerType::Event, Some("employee.created"), now()).await.unwrap();
        let partial = PartialResult { proposals_created: 2, tokens_used: 50, cost_usd: 0.002 };
        assert!(fail_run(&db, &id, "LLM unavailable", Some(partial), now()).await.unwrap());

        let run = get_run(&db, &id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(run.error_message.as_deref(), Some("LLM unavailable"));
        assert_eq!(run.proposals_created, 2);
        assert_eq!(run.trigger_source.as_deref(), Some("employee.created"));
    }

    #[tokio::test]
    async fn test_list_runs_filters_and_order() {
        let db = Database::in_memory().await.unwrap();
        for i in 0..5 {
            seeded_run(&db, "a", now() + Duration::minutes(i), RunStatus::Success).await;
        }
        seeded_run(&db, "b", now() + Duration::minutes(10), RunStatus::Error).await;

        let all = list_runs(&db, &RunFilter::default()).await.unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0].agent_id, "b");

        let limited = list_runs(
            &db,
            &RunFilter { agent_id: Some("a".into()), limit: Some(2), ..Default::default() },
        )
        .await
        .unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].started_at, now() + Duration::minutes(4));

        let errors = list_runs(
            &db,
            &RunFilter { status: Some(RunStatus::Error), ..Default::default() },
        )
        .await
        .unwrap();
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn test_run_stats_window() {
        let db = Database::in_memory().await.unwrap();
        seeded_run(&db, "a", now() - Duration::days(10), RunStatus::Success).await;
        seeded_run(&db, "a", now() - Duration::hours(3), RunStatus::Success).await;
        seeded_run(&db, "a", now() - Duration::hours(2), RunStatus::Error).await;
        seeded_run(&db, "b", now() - Duration::hours(1), RunStatus::Partial).await;
        seeded_run(&db, "b", now() - Duration::minutes(1), RunStatus::Running).await;

        let stats = run_stats(&db, None, DEFAULT_STATS_DAYS, now()).await.unwrap();
        assert_eq!(stats.total_runs, 4);
        assert_eq!(stats.success_runs, 1);
        assert_eq!(stats.error_runs, 1);
        assert_eq!(stats.avg_duration_ms, 2000);

        let only_a = run_stats(&db, Some("a"), 30, now()).await.unwrap();
        assert_eq!(only_a.total_runs, 3);

        let everything = run_stats(&db, None, i64::MAX, now()).await.unwrap();
        assert_eq!(everything.total_runs, 5);
    }

    #[tokio::test]
    async fn test_fail_stuck_runs() {
        let db = Database::in_memory().await.unwrap();
        let old = seeded_run(&db, "a", now() - Duration::minutes(45), RunStatus::Running).await;
        let fresh = seeded_run(&db, "b", now() - Duration::minutes(5), RunStatus::Running).await;

        let killed = fail_stuck_runs(&db, now() - Duration::minutes(30), now()).await.unwrap();
        assert_eq!(killed.len(), 1);
        assert_eq!(killed[0].id, old);

        let old_run = get_run(&db, &old).await.unwrap().unwrap();
        assert_eq!(old_run.status, RunStatus::Error);
        assert_eq!(old_run.error_message.as_deref(), Some(STUCK_RUN_MESSAGE));
        assert_eq!(get_run(&db, &fresh).await.unwrap().unwrap().status, RunStatus::Running);
    }

    #[tokio::test]
    async fn test_error_streaks_count_latest_consecutive_errors() {
        let db = Database::in_memory().await.unwrap();
        // a: success, then three errors (newest last)
        seeded_run(&db, "a", now() - Duration::minutes(40), RunStatus::Success).await;
        for i in 0..3 {
            seeded_run(&db, "a", now() - Duration::minutes(30 - i), RunStatus::Error).await;
        }
        // b: error followed by a newer success
        seeded_run(&db, "b", now() - Duration::minutes(20), RunStatus::Error).await;
        seeded_run(&db, "b", now() - Duration::minutes(10), RunStatus::Success).await;

        let streaks = error_streaks(&db, ERROR_STREAK_WINDOW).await.unwrap();
        assert_eq!(streaks.get("a"), Some(&3));
        assert_eq!(streaks.get("b"), Some(&0));
    }

    #[tokio::test]
    async fn test_has_recent_success() {
        let db = Database::in_memory().await.unwrap();
        seeded_run(&db, "a", now() - Duration::hours(30), RunStatus::Success).await;
        assert!(!has_recent_success(&db, now() - Duration::hours(24)).await.unwrap());

        seeded_run(&db, "a", now() - Duration::hours(1), RunStatus::Success).await;
        assert!(has_recent_success(&db, now() - Duration::hours(24)).await.unwrap());
    }

    #[tokio::test]
    async fn test_dashboard_charts() {
        use crate::agents::proposals::{self, tests::new_proposal};
        use crate::agents::registry::tests::new_agent;
        use crate::agents::types::RiskLevel;

        let db = Database::in_memory().await.unwrap();
        let mut analyzer = new_agent("gap_analyzer", AgentCluster::SkillDev, None);
        analyzer.daily_token_budget = Some(100_000);
        registry::register_agent(&db, analyzer, now()).await.unwrap();
        registry::register_agent(&db, new_agent("hr_auditor", AgentCluster::OpsHr, None), now())
            .await
            .unwrap();
        registry::add_tokens_used(&db, "gap_analyzer", 25_000).await.unwrap();

        let run = start_run(&db, "gap_analyzer", TriggerType::Cron, None, now() - Duration::hours(1))
            .await
            .unwrap();
        let completion = RunCompletion {
            status: Some(RunStatus::Success),
            cost_usd: 0.12346,
            ..Default::default()
        };
        complete_run(&db, &run, completion, now()).await.unwrap();
        seeded_run(&db, "hr_auditor", now() - Duration::days(1), RunStatus::Error).await;
        seeded_run(&db, "hr_auditor", now() - Duration::days(10), RunStatus::Success).await;
        proposals::create_proposal(&db, new_proposal("gap_analyzer", "training_plan", RiskLevel::Low), now())
            .await
            .unwrap();

        let charts = dashboard_charts(&db, now()).await.unwrap();
        assert_eq!(charts.days.len(), CHART_DAYS as usize);
        assert_eq!(charts.days[0], "2024-05-28");
        assert_eq!(charts.days[6], "2024-06-03");
        assert_eq!(charts.clusters.len(), 2);

        let skill_dev = charts.cost_series.iter().find(|s| s.name == "skill_dev").unwrap();
        assert_eq!(skill_dev.data[6], 0.1235);
        assert_eq!(skill_dev.data[..6].iter().sum::<f64>(), 0.0);

        assert_eq!(charts.run_series[0].name, "Success");
        assert_eq!(charts.run_series[0].data, vec![0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(charts.run_series[1].data, vec![0, 0, 0, 0, 0, 1, 0]);
        assert!(charts.run_series[2].data.iter().all(|n| *n == 0));

        let tokens = charts.agent_tokens.iter().find(|a| a.agent_id == "gap_analyzer").unwrap();
        assert_eq!((tokens.used, tokens.budget, tokens.pct), (25_000, 100_000, 25));
        assert_eq!(charts.proposals_by_agent["gap_analyzer"]["pending"], 1);
        assert!(!charts.proposals_by_agent.contains_key("hr_auditor"));
    }
}
