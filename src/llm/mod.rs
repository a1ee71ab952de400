//! OpenAI-compatible chat client shared by all agents
//!
//! Every call is checked against the calling agent's daily token budget,
//! retried on transient failures, and recorded in `ai_usage_log`.

pub mod types;

use std::time::{Duration, Instant};

use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use sqlx::types::Json;

pub use types::*;

use crate::agents::registry;
use crate::config::AppConfig;
use crate::db::Database;

/// HTTP client timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Retries after the first attempt
const MAX_RETRIES: usize = 2;

/// First backoff delay, doubled on every retry
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct LlmClient {
    http: Client,
    api_key: Option<String>,
    base_url: String,
    retry_delay: Duration,
}

impl LlmClient {
    pub fn new(config: &AppConfig) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key: config.openai_api_key.clone(),
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            retry_delay: RETRY_BASE_DELAY,
        })
    }

    /// Override the first retry delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Budget-checked, retried, logged chat completion
    pub async fn agent_chat(&self, db: &Database, options: ChatOptions) -> Result<ChatResult, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::MissingApiKey)?;
        let model = options.model.model_name();
        let now = Utc::now();

        let agent_known = self.check_budget(db, &options.agent_id, now).await?;

        let request = ChatCompletionRequest {
            model,
            messages: &options.messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            response_format: options
                .json_response
                .then_some(ResponseFormat { kind: "json_object" }),
        };

        let started = Instant::now();
        let outcome = (|| async { self.send_request(api_key, &request).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(self.retry_delay)
                    .with_factor(2.0)
                    .with_max_times(MAX_RETRIES),
            )
            .when(|e: &LlmError| e.should_retry())
            .notify(|e, dur| {
                tracing::warn!(
                    agent_id = %options.agent_id,
                    "OpenAI call failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await;
        let duration_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(response) => {
                let usage = response.usage.unwrap_or_default();
                let content = response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default();
                let cost_usd = (usage.total_tokens as f64 / 1000.0) * cost_per_1k(model);

                self.log_usage(db, &options, model, &usage, cost_usd, Some(duration_ms), None)
                    .await;
                if agent_known {
                    registry::add_tokens_used(db, &options.agent_id, usage.total_tokens).await?;
                }

                tracing::debug!(
                    agent_id = %options.agent_id,
                    model,
                    tokens = usage.total_tokens,
                    duration_ms,
                    "OpenAI call completed"
                );

                Ok(ChatResult {
                    content,
                    tokens_used: usage.total_tokens,
                    cost_usd,
                    model: model.to_string(),
                    duration_ms,
                })
            }
            Err(err) => {
                self.log_usage(db, &options, model, &Usage::default(), 0.0, None, Some(&err.to_string()))
                    .await;
                tracing::error!(agent_id = %options.agent_id, error = %err, "OpenAI call failed");
                Err(err)
            }
        }
    }

    /// Chat call whose content is parsed as JSON
    pub async fn agent_chat_json<T: DeserializeOwned>(
        &self,
        db: &Database,
        options: ChatOptions,
    ) -> Result<(T, ChatResult), LlmError> {
        let result = self.agent_chat(db, options.json()).await?;
        let parsed = serde_json::from_str(&result.content)
            .map_err(|e| LlmError::Serde(format!("{} in response: {}", e, result.content)))?;
        Ok((parsed, result))
    }

    /// Resets usage on a new UTC day, otherwise rejects exhausted budgets.
    /// Returns whether the agent exists in the registry.
    async fn check_budget(&self, db: &Database, agent_id: &str, now: DateTime<Utc>) -> Result<bool, LlmError> {
        let Some(agent) = registry::get_agent(db, agent_id).await? else {
            return Ok(false);
        };

        if agent.budget_reset_at.date_naive() != now.date_naive() {
            registry::reset_agent_budget(db, agent_id, now).await?;
        } else if agent.daily_tokens_used >= agent.daily_token_budget {
            return Err(LlmError::OverBudget {
                agent_id: agent_id.to_string(),
                used: agent.daily_tokens_used,
                budget: agent.daily_token_budget,
            });
        }
        Ok(true)
    }

    async fn send_request(
        &self,
        api_key: &str,
        request: &ChatCompletionRequest<'_>,
    ) -> Result<ChatCompletionResponse, LlmError> {
        let res = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => res
                .json::<ChatCompletionResponse>()
                .await
                .map_err(|e| LlmError::Serde(e.to_string())),
            StatusCode::UNAUTHORIZED => Err(LlmError::InvalidApiKey),
            StatusCode::TOO_MANY_REQUESTS => {
                Err(LlmError::RateLimited(res.text().await.unwrap_or_default()))
            }
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(LlmError::Http { status, body })
            }
        }
    }

    /// Usage rows are best effort: a logging failure never fails the call
    #[allow(clippy::too_many_arguments)]
    async fn log_usage(
        &self,
        db: &Database,
        options: &ChatOptions,
        model: &str,
        usage: &Usage,
        cost_usd: f64,
        duration_ms: Option<i64>,
        error: Option<&str>,
    ) {
        let result = sqlx::query(
            "INSERT INTO ai_usage_log (id, feature, model, tokens_used, prompt_tokens, completion_tokens, \
             cost_usd, duration_ms, success, error_message, metadata, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(format!("agent:{}", options.agent_id))
        .bind(model)
        .bind(usage.total_tokens)
        .bind(usage.prompt_tokens)
        .bind(usage.completion_tokens)
        .bind(cost_usd)
        .bind(duration_ms)
        .bind(error.is_none())
        .bind(error)
        .bind(Json(json!({ "run_id": options.run_id })))
        .bind(Utc::now())
        .execute(db.pool())
        .await;

        if let Err(e) = result {
            tracing::warn!(agent_id = %options.agent_id, error = %e, "Failed to write ai_usage_log");
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::registry::tests::new_agent;
    use crate::agents::types::AgentCluster;

    const COMPLETION: &str = r#"{
        "choices": [{"message": {"role": "assistant", "content": "{\"approve\": true}"}}],
        "usage": {"total_tokens": 2000, "prompt_tokens": 1500, "completion_tokens": 500}
    }"#;

    fn client(base_url: &str, key: Option<&str>) -> LlmClient {
        let config = AppConfig {
            openai_api_key: key.map(str::to_string),
            openai_base_url: base_url.to_string(),
            ..AppConfig::default()
        };
        LlmClient::new(&config)
            .unwrap()
            .with_retry_delay(Duration::from_millis(1))
    }

    async fn db_with_agent(agent_id: &str) -> Database {
        let db = Database::in_memory().await.unwrap();
        registry::register_agent(&db, new_agent(agent_id, AgentCluster::Orchestration, None), Utc::now())
            .await
            .unwrap();
        db
    }

    async fn usage_rows(db: &Database) -> Vec<(bool, i64, Option<String>)> {
        sqlx::query_as("SELECT success, tokens_used, error_message FROM ai_usage_log")
            .fetch_all(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_successful_call_logs_and_charges_budget() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(mockito::Matcher::PartialJson(json!({
                "model": "gpt-4o-mini",
                "response_format": {"type": "json_object"}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(COMPLETION)
            .expect(1)
            .create_async()
            .await;

        let db = db_with_agent("supervisor_agent").await;
        let llm = client(&server.url(), Some("test-key"));
        let options = ChatOptions::new("supervisor_agent", vec![ChatMessage::user("evaluate")]).run_id("run-1");

        let (parsed, result): (serde_json::Value, _) = llm.agent_chat_json(&db, options).await.unwrap();
        mock.assert_async().await;

        assert_eq!(parsed["approve"], true);
        assert_eq!(result.tokens_used, 2000);
        assert!((result.cost_usd - 0.0006).abs() < 1e-9);

        let agent = registry::get_agent(&db, "supervisor_agent").await.unwrap().unwrap();
        assert_eq!(agent.daily_tokens_used, 2000);
        assert_eq!(usage_rows(&db).await, vec![(true, 2000, None)]);
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_gives_up() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .with_body("overloaded")
            .expect(3)
            .create_async()
            .await;

        let db = db_with_agent("gap_analyzer").await;
        let llm = client(&server.url(), Some("test-key"));
        let err = llm
            .agent_chat(&db, ChatOptions::new("gap_analyzer", vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        mock.assert_async().await;

        assert!(matches!(err, LlmError::Http { status: 503, .. }));
        let rows = usage_rows(&db).await;
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].0);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(400)
            .with_body("bad request")
            .expect(1)
            .create_async()
            .await;

        let db = db_with_agent("gap_analyzer").await;
        let llm = client(&server.url(), Some("test-key"));
        let err = llm
            .agent_chat(&db, ChatOptions::new("gap_analyzer", vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        mock.assert_async().await;
        assert!(matches!(err, LlmError::Http { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_over_budget_skips_the_call() {
        let server = mockito::Server::new_async().await;
        let db = db_with_agent("gap_analyzer").await;
        registry::add_tokens_used(&db, "gap_analyzer", 100_000).await.unwrap();

        let llm = client(&server.url(), Some("test-key"));
        let err = llm
            .agent_chat(&db, ChatOptions::new("gap_analyzer", vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::OverBudget { used: 100_000, .. }));
    }

    #[tokio::test]
    async fn test_new_day_resets_budget_before_calling() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(COMPLETION)
            .create_async()
            .await;

        let db = db_with_agent("gap_analyzer").await;
        registry::add_tokens_used(&db, "gap_analyzer", 100_000).await.unwrap();
        registry::reset_agent_budget(&db, "gap_analyzer", Utc::now() - chrono::Duration::days(2))
            .await
            .unwrap();
        registry::add_tokens_used(&db, "gap_analyzer", 100_000).await.unwrap();

        let llm = client(&server.url(), Some("test-key"));
        llm.agent_chat(&db, ChatOptions::new("gap_analyzer", vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        mock.assert_async().await;

        let agent = registry::get_agent(&db, "gap_analyzer").await.unwrap().unwrap();
        assert_eq!(agent.daily_tokens_used, 2000);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let db = Database::in_memory().await.unwrap();
        let llm = client("http://127.0.0.1:9", None);
        assert!(!llm.is_configured());
        let err = llm
            .agent_chat(&db, ChatOptions::new("x", vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey));
    }
}
