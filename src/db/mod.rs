//! SQLite persistence
//!
//! Wraps a `sqlx` pool and runs the embedded migrations on connect. Every
//! timestamp column is written from Rust as `DateTime<Utc>` so textual
//! comparisons in SQL stay consistent.

pub mod audit;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::error::AppResult;

/// Maximum pool size for file-backed databases
const MAX_CONNECTIONS: u32 = 8;

/// How long a caller waits for a free connection
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating when allowed by the URL) and migrate the database
    pub async fn connect(url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        tracing::info!(url = %redact_url(url), "Database ready");
        Ok(db)
    }

    /// Private in-memory database, used by tests and dry runs
    ///
    /// Each SQLite `:memory:` connection is its own database, so the pool is
    /// pinned to a single connection that never expires.
    pub async fn in_memory() -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap liveness probe for the health endpoint
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

/// Drop query parameters (which may carry credentials) before logging a URL
fn redact_url(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
