//! In-process cron jobs
//!
//! Runs the dispatch sweep, notification drain and daily budget reset on
//! `tokio-cron-scheduler`, so the server works without an external cron
//! hitting `/api/cron/*`.

use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};

use super::dispatcher;
use crate::error::{AppError, AppResult};
use crate::services::Services;

/// Every 5 minutes, matching the 5-minute dispatch resolution
pub const DISPATCH_CRON: &str = "0 */5 * * * *";
pub const NOTIFICATIONS_CRON: &str = "0 */2 * * * *";
/// Midnight UTC
pub const BUDGET_RESET_CRON: &str = "0 0 0 * * *";

/// In-process replacement for the external cron that calls `/api/cron/*`
pub struct SchedulerManager {
    scheduler: JobScheduler,
}

impl SchedulerManager {
    pub async fn new(services: Services) -> AppResult<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::config(format!("Failed to create scheduler: {}", e)))?;

        let manager = Self { scheduler };
        manager.add_dispatcher(services.clone()).await?;
        manager.add_notifications(services.clone()).await?;
        manager.add_budget_reset(services).await?;
        Ok(manager)
    }

    async fn add_job(&self, job: Result<Job, tokio_cron_scheduler::JobSchedulerError>, name: &str) -> AppResult<()> {
        let job = job.map_err(|e| AppError::config(format!("Failed to create {} job: {}", name, e)))?;
        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::config(format!("Failed to add {} job to scheduler: {}", name, e)))?;
        Ok(())
    }

    async fn add_dispatcher(&self, services: Services) -> AppResult<()> {
        let job = Job::new_async(DISPATCH_CRON, move |_uuid, _lock| {
            let services = services.clone();
            Box::pin(async move {
                if let Err(e) = dispatcher::dispatch(&services, Utc::now()).await {
                    tracing::error!(error = %e, "Scheduled dispatch failed");
                }
            })
        });
        self.add_job(job, "dispatcher").await
    }

    async fn add_notifications(&self, services: Services) -> AppResult<()> {
        let job = Job::new_async(NOTIFICATIONS_CRON, move |_uuid, _lock| {
            let services = services.clone();
            Box::pin(async move {
                if let Err(e) = dispatcher::process_notifications(&services, Utc::now()).await {
                    tracing::error!(error = %e, "Scheduled notification processing failed");
                }
            })
        });
        self.add_job(job, "notifications").await
    }

    async fn add_budget_reset(&self, services: Services) -> AppResult<()> {
        let job = Job::new_async(BUDGET_RESET_CRON, move |_uuid, _lock| {
            let services = services.clone();
            Box::pin(async move {
                if let Err(e) = dispatcher::reset_budgets(&services, Utc::now()).await {
                    tracing::error!(error = %e, "Scheduled budget reset failed");
                }
            })
        });
        self.add_job(job, "budget reset").await
    }

    pub async fn start(&self) -> AppResult<()> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::config(format!("Failed to start scheduler: {}", e)))?;
        tracing::info!(
            dispatch = DISPATCH_CRON,
            notifications = NOTIFICATIONS_CRON,
            budget_reset = BUDGET_RESET_CRON,
            "Internal scheduler started"
        );
        Ok(())
    }

    /// Stop the scheduler
    pub async fn shutdown(&mut self) -> AppResult<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::config(format!("Failed to shutdown scheduler: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::tests::test_services;

    #[tokio::test]
    async fn test_jobs_register_and_shut_down() {
        let services = test_services().await;
        let mut manager = SchedulerManager::new(services).await.unwrap();
        manager.start().await.unwrap();
        manager.shutdown().await.unwrap();
    }

    #[test]
    fn test_job_expressions_have_seconds_field() {
        for expr in [DISPATCH_CRON, NOTIFICATIONS_CRON, BUDGET_RESET_CRON] {
            assert_eq!(expr.split_whitespace().count(), 6);
        }
    }
}
