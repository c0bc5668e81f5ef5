//! Cron scheduler for the periodic retention sweep.

use std::sync::Arc;

use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing;

use coursegen_core::config::jobs::RetentionConfig;
use coursegen_core::error::AppError;

use crate::queue::JobQueue;

/// Cron-based scheduler that keeps finished jobs within their retention policy.
pub struct RetentionScheduler {
    /// The underlying job scheduler
    scheduler: JobScheduler,
    /// Job queue the sweep runs against
    queue: Arc<JobQueue>,
}

impl std::fmt::Debug for RetentionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionScheduler").finish()
    }
}

impl RetentionScheduler {
    /// Create a new retention scheduler
    pub async fn new(queue: Arc<JobQueue>) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::internal(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self { scheduler, queue })
    }

    /// Register the retention sweep for `queues` if it is enabled.
    pub async fn register(
        &self,
        config: &RetentionConfig,
        queues: Vec<String>,
    ) -> Result<(), AppError> {
        if !config.enabled {
            tracing::info!("Retention sweep disabled");
            return Ok(());
        }

        let queue = Arc::clone(&self.queue);
        let queues = Arc::new(queues);
        let job = CronJob::new_async(config.schedule.as_str(), move |_uuid, _lock| {
            let queue = Arc::clone(&queue);
            let queues = Arc::clone(&queues);
            Box::pin(async move {
                tracing::debug!("Running retention sweep");
                match queue.sweep(&queues).await {
                    Ok(removed) => tracing::info!(removed, "Retention sweep finished"),
                    Err(e) => tracing::error!(error = %e, "Retention sweep failed"),
                }
            })
        })
        .map_err(|e| {
            AppError::configuration(format!(
                "Invalid retention schedule '{}': {}",
                config.schedule, e
            ))
        })?;

        self.scheduler.add(job).await.map_err(|e| {
            AppError::internal(format!("Failed to add retention schedule: {}", e))
        })?;

        tracing::info!(schedule = %config.schedule, "Registered: retention sweep");
        Ok(())
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<(), AppError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::internal(format!("Failed to start scheduler: {}", e)))?;

        tracing::info!("Cron scheduler started");
        Ok(())
    }

    /// Shutdown the scheduler
    pub async fn shutdown(&mut self) -> Result<(), AppError> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("Failed to shutdown scheduler: {}", e)))?;

        tracing::info!("Cron scheduler shut down");
        Ok(())
    }
}
