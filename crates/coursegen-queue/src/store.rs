//! The queue store abstraction.
//!
//! The store is the single shared source of truth for job state. Workers
//! coordinate only through these primitives; each one is an atomic state
//! transition in the backing store.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use coursegen_core::result::AppResult;
use coursegen_core::types::JobId;
use coursegen_entity::job::{ChildrenValues, Job, JobProgress, JobState, QueueMetrics};

/// Failure reason recorded when a job exceeds its stall budget.
pub const STALLED_REASON: &str = "job stalled more than allowable limit";

/// Outcome of adding a single job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new job was stored.
    Created(JobId),
    /// An equivalent job is outstanding; nothing was written.
    Duplicate(JobId),
}

impl AddOutcome {
    /// Id of the stored or existing job.
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Created(id) | Self::Duplicate(id) => id,
        }
    }

    /// Consume and return the job id.
    pub fn into_job_id(self) -> JobId {
        match self {
            Self::Created(id) | Self::Duplicate(id) => id,
        }
    }
}

/// What the stalled checker did with a job whose lease expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalledOutcome {
    /// Moved back to `waiting`.
    Requeued,
    /// Failed with [`STALLED_REASON`].
    Failed,
}

/// A job found with an expired lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledJob {
    /// Job id.
    pub job_id: JobId,
    /// What happened to it.
    pub outcome: StalledOutcome,
}

/// Durable queue store primitives.
///
/// Lock tokens identify the lease a worker holds on an active job.
/// Mutations guarded by a token fail with `Conflict` when the token no
/// longer owns the job.
#[async_trait]
pub trait QueueStore: Send + Sync + std::fmt::Debug + 'static {
    /// Store a new job.
    ///
    /// If the job carries a dedupe key that maps to an outstanding job of
    /// the same name, or its id is already taken, nothing is written and
    /// the existing id is returned.
    async fn add_job(&self, job: Job) -> AppResult<AddOutcome>;

    /// Store a parent and its children as one unit.
    ///
    /// The parent is stored in `waiting-children`; children are claimable
    /// immediately. Fails with `Conflict` and writes nothing if any id is
    /// already taken or any dedupe key is held by an outstanding job.
    async fn add_flow(&self, parent: Job, children: Vec<Job>) -> AppResult<()>;

    /// Claim the next job of `queue` and lease it under `token`.
    ///
    /// Due delayed jobs are promoted first. Lower priority values are
    /// claimed first, then enqueue order.
    async fn claim(&self, queue: &str, token: &str, lock_duration: Duration)
    -> AppResult<Option<Job>>;

    /// Renew a lease. Returns `false` when the lease is no longer held.
    async fn extend_lock(&self, job_id: &JobId, token: &str, lock_duration: Duration)
    -> AppResult<bool>;

    /// Mark an attempt successful and store its result.
    ///
    /// A flow child's result is recorded on its parent; the parent is
    /// released once no children remain.
    async fn complete(&self, job_id: &JobId, token: &str, result: Value) -> AppResult<()>;

    /// Mark an attempt failed.
    ///
    /// With `retry_after` set and attempts remaining the job is scheduled
    /// again after that delay; otherwise it fails terminally. Returns the
    /// job's new state.
    async fn fail(
        &self,
        job_id: &JobId,
        token: &str,
        reason: &str,
        retry_after: Option<Duration>,
    ) -> AppResult<JobState>;

    /// Overwrite the job's progress.
    async fn update_progress(&self, job_id: &JobId, progress: &JobProgress) -> AppResult<()>;

    /// Read a job.
    async fn get_job(&self, job_id: &JobId) -> AppResult<Option<Job>>;

    /// Terminal outcomes of a parent's children.
    async fn children_values(&self, parent_id: &JobId) -> AppResult<ChildrenValues>;

    /// Counts per state for `queue`.
    async fn counts(&self, queue: &str) -> AppResult<QueueMetrics>;

    /// Remove `completed` or `failed` jobs finished more than `older_than`
    /// ago, always keeping the newest `keep`. Returns how many were removed.
    async fn clean(
        &self,
        queue: &str,
        state: JobState,
        older_than: Duration,
        keep: u64,
    ) -> AppResult<u64>;

    /// Recover active jobs of `queue` whose lease expired.
    async fn recover_stalled(&self, queue: &str, max_stalled_count: u32)
    -> AppResult<Vec<StalledJob>>;

    /// Wait until work may be available on `queue`, at most `timeout`.
    async fn wait_for_work(&self, _queue: &str, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }

    /// Check store connectivity.
    async fn health_check(&self) -> AppResult<bool>;
}
