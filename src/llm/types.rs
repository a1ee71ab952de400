//! OpenAI chat-completions wire types and agent-facing call options

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Model tier an agent asks for; mapped to a concrete model name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Reasoning,
    #[default]
    Fast,
}

impl ModelTier {
    pub fn model_name(self) -> &'static str {
        match self {
            ModelTier::Reasoning => "gpt-4o",
            ModelTier::Fast => "gpt-4o-mini",
        }
    }
}

/// Blended (input + output) USD cost per 1K tokens
pub fn cost_per_1k(model: &str) -> f64 {
    match model {
        "gpt-4o" => 0.0075,
        "gpt-4o-mini" => 0.0003,
        _ => 0.001,
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One LLM call made on behalf of an agent
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub agent_id: String,
    pub run_id: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub model: ModelTier,
    pub json_response: bool,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatOptions {
    pub fn new(agent_id: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            agent_id: agent_id.into(),
            run_id: None,
            messages,
            model: ModelTier::default(),
            json_response: false,
            max_tokens: 4000,
            temperature: 0.3,
        }
    }

    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn model(mut self, model: ModelTier) -> Self {
        self.model = model;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_response = true;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Result of a successful call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResult {
    pub content: String,
    pub tokens_used: i64,
    pub cost_usd: f64,
    pub model: String,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Usage {
    #[serde(default)]
    pub total_tokens: i64,
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
}

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("OPENAI_API_KEY not configured")]
    MissingApiKey,
    #[error("agent \"{agent_id}\" over daily token budget ({used}/{budget})")]
    OverBudget {
        agent_id: String,
        used: i64,
        budget: i64,
    },
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("OpenAI API {status}: {body}")]
    Http { status: u16, body: String },
    #[error("json error: {0}")]
    Serde(String),
    #[error("database error: {0}")]
    Database(String),
}

impl LlmError {
    /// Returns true if the error is transient and should be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited(_) => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for LlmError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<crate::error::AppError> for LlmError {
    fn from(err: crate::error::AppError) -> Self {
        Self::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_mapping_and_cost() {
        assert_eq!(ModelTier::default().model_name(), "gpt-4o-mini");
        assert_eq!(ModelTier::Reasoning.model_name(), "gpt-4o");
        assert_eq!(cost_per_1k("gpt-4o"), 0.0075);
        assert_eq!(cost_per_1k("something-else"), 0.001);
    }

    #[test]
    fn test_retry_classification() {
        assert!(LlmError::Timeout.should_retry());
        assert!(LlmError::RateLimited("slow down".into()).should_retry());
        assert!(LlmError::Http { status: 503, body: String::new() }.should_retry());
        assert!(!LlmError::Http { status: 400, body: String::new() }.should_retry());
        assert!(!LlmError::InvalidApiKey.should_retry());
        assert!(!LlmError::MissingApiKey.should_retry());
    }

    #[test]
    fn test_request_serialization() {
        let messages = vec![ChatMessage::user("hi")];
        let request = ChatCompletionRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            max_tokens: 200,
            temperature: 0.1,
            response_format: Some(ResponseFormat { kind: "json_object" }),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["messages"][0]["role"], "user");

        let plain = ChatCompletionRequest { response_format: None, ..request };
        assert!(serde_json::to_value(&plain).unwrap().get("response_format").is_none());
    }
}
