//! vetops server binary
//!
//! Usage:
//!   VETOPS_API_HOST=0.0.0.0 VETOPS_API_PORT=3030 ./vetops-server
//!
//! Configuration is read from the environment (and `.env`); see
//! `vetops_lib::config` for the full list.

use chrono::Utc;
use std::process::ExitCode;
use vetops_lib::agents::seed::seed_agents;
use vetops_lib::config::AppConfig;
use vetops_lib::db::Database;
use vetops_lib::error::AppResult;
use vetops_lib::scheduler::SchedulerManager;
use vetops_lib::services::Services;
use vetops_lib::{api, logging};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: failed to load .env: {}", e);
        }
    }
    logging::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> AppResult<()> {
    let config = AppConfig::from_env();
    let addr = config.bind_addr().map_err(vetops_lib::error::AppError::config)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting vetops server");

    let db = Database::connect(&config.database_url).await?;
    let seeded = seed_agents(&db, config.agents_file.as_deref(), Utc::now()).await?;
    if seeded > 0 {
        tracing::info!(seeded, "Seeded agent registry");
    }

    let internal_scheduler = config.internal_scheduler;
    let services = Services::new(db, config)?;

    // Keep the scheduler alive for the lifetime of the server
    let _scheduler = if internal_scheduler {
        let manager = SchedulerManager::new(services.clone()).await?;
        manager.start().await?;
        Some(manager)
    } else {
        tracing::info!("Internal scheduler disabled; expecting an external cron on /api/cron/*");
        None
    };

    api::start_server(services, addr).await
}
