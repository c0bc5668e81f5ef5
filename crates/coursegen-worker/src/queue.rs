//! Producer API: enqueue jobs, read their status, queue metrics, and retention.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use coursegen_core::error::AppError;
use coursegen_core::result::AppResult;
use coursegen_core::types::JobId;
use coursegen_entity::job::{
    EnqueueOptions, Job, JobOptions, JobPayload, JobState, JobStatus, KeepPolicy, QueueMetrics,
};
use coursegen_queue::{AddOutcome, QueueStore};

/// Largest accepted priority value.
pub const MAX_PRIORITY: u32 = 2_097_152;

/// Job queue for enqueuing work and observing it.
#[derive(Debug, Clone)]
pub struct JobQueue {
    /// Shared queue store.
    store: Arc<dyn QueueStore>,
    /// Policy applied to every job unless the caller overrides it.
    defaults: JobOptions,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(store: Arc<dyn QueueStore>, defaults: JobOptions) -> Self {
        Self { store, defaults }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// The default job policy.
    pub fn defaults(&self) -> &JobOptions {
        &self.defaults
    }

    /// Enqueue a job and return its id.
    ///
    /// When the dedupe key matches an outstanding job of the same name, or
    /// the caller-supplied id is already taken, nothing is written and the
    /// existing job's id is returned.
    pub async fn enqueue(
        &self,
        payload: impl Into<JobPayload>,
        options: EnqueueOptions,
    ) -> AppResult<JobId> {
        let job = self.prepare(payload.into(), &options)?;
        let name = job.name;
        let queue = job.queue.clone();
        let delayed = job.run_at.is_some();

        match self.store.add_job(job).await? {
            AddOutcome::Created(id) => {
                debug!(
                    job_id = %id,
                    job_name = %name,
                    queue = %queue,
                    delayed,
                    "Enqueued job"
                );
                Ok(id)
            }
            AddOutcome::Duplicate(id) => {
                info!(
                    job_id = %id,
                    job_name = %name,
                    dedupe_key = ?options.dedupe_key,
                    "Equivalent job already outstanding, returning existing id"
                );
                Ok(id)
            }
        }
    }

    /// Validate a payload and build the job record for it.
    pub(crate) fn prepare(&self, payload: JobPayload, options: &EnqueueOptions) -> AppResult<Job> {
        payload.validate()?;

        let job_options = options.apply(&self.defaults);
        if job_options.priority > MAX_PRIORITY {
            return Err(AppError::validation(format!(
                "Priority {} exceeds the maximum of {MAX_PRIORITY}",
                job_options.priority
            )));
        }
        if let Some(key) = &job_options.dedupe_key {
            if key.trim().is_empty() {
                return Err(AppError::validation("Dedupe key must not be empty"));
            }
        }
        if let Some(id) = &options.job_id {
            if id.as_str().trim().is_empty() {
                return Err(AppError::validation("Job id must not be empty"));
            }
        }

        let name = payload.name();
        let queue = options
            .queue
            .clone()
            .unwrap_or_else(|| name.default_queue().as_str().to_string());
        let id = options.job_id.clone().unwrap_or_else(JobId::generate);

        Ok(Job::new(id, name, queue, payload.to_data()?, job_options))
    }

    /// Read a job's status.
    pub async fn get_status(&self, job_id: &JobId) -> AppResult<JobStatus> {
        self.store
            .get_job(job_id)
            .await?
            .map(JobStatus::from)
            .ok_or_else(|| AppError::not_found(format!("Job {job_id} not found")))
    }

    /// Counts per state for `queue`. Approximate under concurrent mutation.
    pub async fn get_metrics(&self, queue: &str) -> AppResult<QueueMetrics> {
        self.store.counts(queue).await
    }

    /// Remove `state` jobs of `queue` finished more than `older_than` ago,
    /// keeping the newest `keep`. Only `completed` and `failed` are accepted.
    pub async fn clean(
        &self,
        queue: &str,
        older_than: Duration,
        keep: u64,
        state: JobState,
    ) -> AppResult<u64> {
        if !state.is_terminal() {
            return Err(AppError::validation(format!(
                "Only completed or failed jobs can be cleaned, got '{state}'"
            )));
        }

        let removed = self.store.clean(queue, state, older_than, keep).await?;
        if removed > 0 {
            info!(queue, state = %state, removed, "Cleaned finished jobs");
        }
        Ok(removed)
    }

    /// Apply the default retention policy to every queue in `queues`.
    pub async fn sweep(&self, queues: &[String]) -> AppResult<u64> {
        let mut removed = 0;
        for queue in queues {
            removed += self
                .clean_with(queue, JobState::Completed, self.defaults.remove_on_complete)
                .await?;
            removed += self
                .clean_with(queue, JobState::Failed, self.defaults.remove_on_fail)
                .await?;
        }
        Ok(removed)
    }

    async fn clean_with(&self, queue: &str, state: JobState, keep: KeepPolicy) -> AppResult<u64> {
        self.clean(queue, Duration::from_secs(keep.age_seconds), keep.count, state)
            .await
    }
}
