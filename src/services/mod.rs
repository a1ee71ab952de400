//! Shared service handles
//!
//! One `Services` value is built at startup and cloned into the HTTP state,
//! the internal scheduler and every agent run context.

use std::sync::Arc;

use crate::agents::appliers::ApplierRegistry;
use crate::agents::handlers::HandlerRegistry;
use crate::config::AppConfig;
use crate::db::Database;
use crate::error::AppResult;
use crate::events::EventBus;
use crate::llm::LlmClient;
use crate::notify::SlackClient;

#[derive(Clone)]
pub struct Services {
    pub db: Database,
    pub events: Arc<EventBus>,
    pub llm: LlmClient,
    /// Present only when a Slack bot token is configured
    pub slack: Option<SlackClient>,
    pub handlers: Arc<HandlerRegistry>,
    pub appliers: Arc<ApplierRegistry>,
    pub config: Arc<AppConfig>,
}

impl Services {
    pub fn new(db: Database, config: AppConfig) -> AppResult<Self> {
        let llm = LlmClient::new(&config)?;
        let slack = match &config.slack_bot_token {
            Some(token) => Some(SlackClient::new(token.clone(), config.slack_api_url.clone())?),
            None => None,
        };

        Ok(Self {
            db,
            events: Arc::new(EventBus::new()),
            llm,
            slack,
            handlers: Arc::new(HandlerRegistry::with_builtin()),
            appliers: Arc::new(ApplierRegistry::default()),
            config: Arc::new(config),
        })
    }

    /// Replace the agent handlers (tests and embedders)
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    pub fn with_llm(mut self, llm: LlmClient) -> Self {
        self.llm = llm;
        self
    }
}
