use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Structured error type shared by the service layer and the HTTP handlers
#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Error codes for categorizing different error types
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Caller errors
    Unauthorized,
    Forbidden,
    InvalidParams,
    InvalidSchedule,
    NotFound,
    Conflict,
    InvalidState,

    // Dependency errors
    DatabaseError,
    LlmError,
    SlackError,

    // Server errors
    ConfigError,
    Unknown,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::InvalidParams | ErrorCode::InvalidSchedule | ErrorCode::InvalidState => {
                StatusCode::BAD_REQUEST
            }
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::LlmError | ErrorCode::SlackError => StatusCode::BAD_GATEWAY,
            ErrorCode::DatabaseError | ErrorCode::ConfigError | ErrorCode::Unknown => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(details) = &self.details {
            write!(f, "{:?}: {} - {}", self.code, self.message, details)
        } else {
            write!(f, "{:?}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for AppError {}

// Convenience constructors
impl AppError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, msg)
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, msg)
    }

    pub fn invalid_schedule(expr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidSchedule,
            message: format!("Invalid cron schedule \"{}\"", expr.into()),
            details: Some(reason.into()),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, what)
    }

    pub fn agent_not_found(agent_id: &str) -> Self {
        Self::not_found(format!("Agent \"{}\" not found", agent_id))
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, msg)
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, msg)
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, msg)
    }

    pub fn llm(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::LlmError, msg)
    }

    pub fn slack(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::SlackError, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, msg)
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, msg)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.code.status();
        if status.is_server_error() {
            tracing::error!(code = ?self.code, details = ?self.details, "{}", self.message);
        }
        (status, Json(self)).into_response()
    }
}

// Conversions from common error types
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::not_found("Row not found"),
            other => Self::database(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::database(format!("Migration failed: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_params(format!("JSON serialization error: {}", err))
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::config(format!("YAML parse error: {}", err))
    }
}

impl From<crate::llm::LlmError> for AppError {
    fn from(err: crate::llm::LlmError) -> Self {
        use crate::llm::LlmError;
        match err {
            LlmError::MissingApiKey => Self::config(err.to_string()),
            LlmError::OverBudget { .. } => Self::invalid_state(err.to_string()),
            LlmError::Database(msg) => Self::database(msg),
            other => Self::llm(other.to_string()),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => Self::not_found(err.to_string()),
            _ => Self::unknown(err.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
