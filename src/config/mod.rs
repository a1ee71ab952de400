//! Runtime configuration
//!
//! Everything is read from environment variables (a `.env` file is honoured by
//! the server binary). Optional integrations degrade gracefully when their
//! keys are missing: LLM calls fail per-run, the Slack queue is left pending.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Default HTTP bind host
const DEFAULT_HOST: &str = "127.0.0.1";

/// Default HTTP port
const DEFAULT_PORT: u16 = 3030;

/// Default SQLite database location
const DEFAULT_DATABASE_URL: &str = "sqlite://vetops.db?mode=rwc";

/// Default OpenAI-compatible API base
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default Slack Web API base
pub const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api";

/// Channel used when an approved alert names no recipient
pub const DEFAULT_ALERTS_CHANNEL: &str = "#agent-alerts";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub cron_secret: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub slack_bot_token: Option<String>,
    pub slack_api_url: String,
    pub alerts_channel: String,
    pub internal_scheduler: bool,
    pub agents_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            cron_secret: None,
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            slack_bot_token: None,
            slack_api_url: DEFAULT_SLACK_API_URL.to_string(),
            alerts_channel: DEFAULT_ALERTS_CHANNEL.to_string(),
            internal_scheduler: true,
            agents_file: None,
        }
    }
}

impl AppConfig {
    /// Create config from environment variables with fallbacks
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the process env in production)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: non_empty("VETOPS_API_HOST").unwrap_or(defaults.host),
            port: non_empty("VETOPS_API_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            database_url: non_empty("DATABASE_URL").unwrap_or(defaults.database_url),
            cron_secret: non_empty("CRON_SECRET"),
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_base_url: non_empty("OPENAI_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.openai_base_url),
            slack_bot_token: non_empty("SLACK_BOT_TOKEN"),
            slack_api_url: non_empty("SLACK_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.slack_api_url),
            alerts_channel: non_empty("VETOPS_ALERTS_CHANNEL").unwrap_or(defaults.alerts_channel),
            internal_scheduler: non_empty("VETOPS_INTERNAL_SCHEDULER")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.internal_scheduler),
            agents_file: non_empty("VETOPS_AGENTS_FILE").map(PathBuf::from),
        }
    }

    /// Socket address the HTTP server binds to
    pub fn bind_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| format!("Invalid VETOPS_API_HOST address: {}", e))
    }

    /// Whether the bind address exposes the server beyond loopback
    pub fn is_network_exposed(&self) -> bool {
        self.host != "127.0.0.1" && self.host != "localhost" && self.host != "::1"
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
