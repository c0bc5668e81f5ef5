//! Job executor: processor registry, per-attempt context, and progress reporting.
//!
//! Every processor must be safe to re-invoke from scratch. A lost lease or a
//! crashed worker makes the job claimable again and the processor is run
//! from the beginning, so external side effects have to be idempotent
//! (upserts keyed by the job id or another natural key, never blind inserts).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use coursegen_core::error::AppError;
use coursegen_core::result::AppResult;
use coursegen_core::types::JobId;
use coursegen_entity::job::{ChildrenValues, Job, JobName, JobProgress};
use coursegen_queue::QueueStore;

use crate::events::WorkerEvent;

/// Trait for job processor implementations.
#[async_trait]
pub trait JobProcessor: Send + Sync + std::fmt::Debug + 'static {
    /// Job name this processor handles.
    fn name(&self) -> JobName;

    /// Run one attempt of the job and return its result.
    async fn process(&self, ctx: &JobContext) -> Result<Value, JobExecutionError>;
}

/// Error from job execution.
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// Permanent failure, do not retry.
    #[error("Permanent job failure: {0}")]
    Permanent(String),

    /// Transient failure, may retry.
    #[error("Transient job failure: {0}")]
    Transient(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

impl JobExecutionError {
    /// Whether the failure consumes an attempt and may be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}

impl From<serde_json::Error> for JobExecutionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(AppError::from(err))
    }
}

/// Fire-and-forget, ordered progress reporter for one job attempt.
///
/// Reports are written by a background task in the order they were made;
/// when several are queued only the latest is written.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<JobProgress>>,
}

impl ProgressReporter {
    /// Reporter that discards every report.
    pub fn noop() -> Self {
        Self::default()
    }

    /// Start the writer task for `job_id`.
    ///
    /// The task ends once every clone of the reporter has been dropped and
    /// the queued reports are written.
    pub fn spawn(
        store: Arc<dyn QueueStore>,
        job_id: JobId,
        events: broadcast::Sender<WorkerEvent>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<JobProgress>();

        let task = tokio::spawn(async move {
            while let Some(mut progress) = rx.recv().await {
                while let Ok(newer) = rx.try_recv() {
                    progress = newer;
                }

                if let Err(e) = store.update_progress(&job_id, &progress).await {
                    warn!(job_id = %job_id, error = %e, "Failed to store job progress");
                    continue;
                }
                let _ = events.send(WorkerEvent::Progress {
                    job_id: job_id.clone(),
                    progress,
                });
            }
        });

        (Self { tx: Some(tx) }, task)
    }

    /// Report progress. Never blocks and never fails the job.
    pub fn report(&self, progress: JobProgress) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(progress);
        }
    }
}

/// Everything a processor sees of the attempt it runs.
#[derive(Debug, Clone)]
pub struct JobContext {
    job: Job,
    store: Arc<dyn QueueStore>,
    progress: ProgressReporter,
}

impl JobContext {
    /// Create a context for one attempt of `job`.
    pub fn new(job: Job, store: Arc<dyn QueueStore>, progress: ProgressReporter) -> Self {
        Self {
            job,
            store,
            progress,
        }
    }

    /// The job record as claimed.
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Job id.
    pub fn job_id(&self) -> &JobId {
        &self.job.id
    }

    /// One-based number of the running attempt.
    pub fn attempt(&self) -> u32 {
        self.job.attempts_made + 1
    }

    /// Decode the job payload.
    ///
    /// A payload that does not decode will never decode, so the error is
    /// permanent.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, JobExecutionError> {
        serde_json::from_value(self.job.payload.clone()).map_err(|e| {
            JobExecutionError::Permanent(format!(
                "Invalid payload for '{}': {e}",
                self.job.name
            ))
        })
    }

    /// Report progress for this attempt.
    pub fn report_progress(&self, progress: JobProgress) {
        self.progress.report(progress);
    }

    /// Terminal outcomes of this job's flow children.
    pub async fn children_values(&self) -> Result<ChildrenValues, JobExecutionError> {
        Ok(self.store.children_values(&self.job.id).await?)
    }
}

type ProcessFn =
    dyn Fn(JobContext) -> BoxFuture<'static, Result<Value, JobExecutionError>> + Send + Sync;

/// Adapts an async closure into a [`JobProcessor`].
pub struct FnProcessor {
    name: JobName,
    run: Arc<ProcessFn>,
}

impl FnProcessor {
    /// Wrap `run` as the processor for `name`.
    pub fn new<F, Fut>(name: JobName, run: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobExecutionError>> + Send + 'static,
    {
        Self {
            name,
            run: Arc::new(
                move |ctx: JobContext| -> BoxFuture<'static, Result<Value, JobExecutionError>> {
                    Box::pin(run(ctx))
                },
            ),
        }
    }
}

impl std::fmt::Debug for FnProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProcessor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl JobProcessor for FnProcessor {
    fn name(&self) -> JobName {
        self.name
    }

    async fn process(&self, ctx: &JobContext) -> Result<Value, JobExecutionError> {
        (self.run)(ctx.clone()).await
    }
}

/// Dispatches jobs to the processor registered for their name.
#[derive(Debug, Default)]
pub struct ProcessorRegistry {
    /// Registered processors by job name.
    processors: HashMap<JobName, Arc<dyn JobProcessor>>,
}

impl ProcessorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor. Registering a name twice is a conflict.
    pub fn register(&mut self, processor: Arc<dyn JobProcessor>) -> AppResult<()> {
        let name = processor.name();
        if self.processors.contains_key(&name) {
            return Err(AppError::conflict(format!(
                "A processor for '{name}' is already registered"
            )));
        }
        info!(job_name = %name, "Registered job processor");
        self.processors.insert(name, processor);
        Ok(())
    }

    /// Register an async closure as the processor for `name`.
    pub fn register_fn<F, Fut>(&mut self, name: JobName, run: F) -> AppResult<()>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobExecutionError>> + Send + 'static,
    {
        self.register(Arc::new(FnProcessor::new(name, run)))
    }

    /// Execute one attempt by dispatching to the matching processor.
    pub async fn execute(&self, ctx: &JobContext) -> Result<Value, JobExecutionError> {
        let job = ctx.job();
        let processor = self.processors.get(&job.name).ok_or_else(|| {
            JobExecutionError::Permanent(format!(
                "No processor registered for job name '{}'",
                job.name
            ))
        })?;

        debug!(
            job_id = %job.id,
            job_name = %job.name,
            attempt = ctx.attempt(),
            max_attempts = job.options.attempts,
            "Executing job"
        );

        processor.process(ctx).await
    }

    /// Check if a processor is registered for `name`.
    pub fn has_processor(&self, name: JobName) -> bool {
        self.processors.contains_key(&name)
    }

    /// Registered job names.
    pub fn registered_names(&self) -> Vec<JobName> {
        let mut names: Vec<JobName> = self.processors.keys().copied().collect();
        names.sort();
        names
    }
}
