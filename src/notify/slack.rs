//! Minimal Slack Web API client (bot token)

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct SlackClient {
    http: Client,
    token: String,
    base_url: String,
}

/// Common envelope of every Slack Web API response
#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channel: Option<Value>,
}

impl SlackClient {
    pub fn new(token: impl Into<String>, base_url: impl Into<String>) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::slack(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            token: token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn call(&self, method: &str, body: Value) -> AppResult<SlackResponse> {
        let response: SlackResponse = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::slack(format!("{} request failed: {}", method, e)))?
            .json()
            .await
            .map_err(|e| AppError::slack(format!("{} returned invalid JSON: {}", method, e)))?;

        if !response.ok {
            let reason = response.error.as_deref().unwrap_or("unknown_error");
            return Err(AppError::slack(format!("Slack error: {}", reason)));
        }
        Ok(response)
    }

    /// Open (or reuse) a DM with a user and return its channel id
    pub async fn open_dm(&self, user_id: &str) -> AppResult<String> {
        let response = self
            .call("conversations.open", json!({ "users": user_id }))
            .await?;

        response
            .channel
            .as_ref()
            .and_then(|c| c.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AppError::slack("conversations.open returned no channel id"))
    }

    pub async fn post_message(&self, channel: &str, text: &str, blocks: &Value) -> AppResult<()> {
        let mut body = json!({ "channel": channel, "text": text });
        if blocks.as_array().is_some_and(|b| !b.is_empty()) {
            body["blocks"] = blocks.clone();
        }
        self.call("chat.postMessage", body).await?;
        Ok(())
    }
}
