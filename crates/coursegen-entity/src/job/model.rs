//! Job record and its read-only status view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use coursegen_core::types::JobId;

use super::name::JobName;
use super::options::JobOptions;
use super::progress::JobProgress;
use super::state::JobState;

/// Link from a flow child to its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    /// Parent job id.
    pub id: JobId,
    /// Queue the parent lives on.
    pub queue: String,
}

/// A queued unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,
    /// Processor that handles the job.
    pub name: JobName,
    /// Queue name.
    pub queue: String,
    /// Job-specific payload. Never mutated after enqueue.
    pub payload: Value,
    /// Effective options.
    pub options: JobOptions,
    /// Current state.
    pub state: JobState,
    /// Last reported progress.
    pub progress: Option<JobProgress>,
    /// Result data on completion.
    pub result: Option<Value>,
    /// Captured failure reason of the last failed attempt.
    pub failed_reason: Option<String>,
    /// Attempts that ran to an outcome (success, error or timeout).
    pub attempts_made: u32,
    /// Times the job's lease expired while active.
    pub stalled_count: u32,
    /// Parent linkage for flow children.
    pub parent: Option<ParentRef>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// First pick-up by a worker.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// When a delayed job becomes claimable.
    pub run_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a new job record in its initial state.
    ///
    /// Jobs with a positive delay start `delayed`; everything else starts
    /// `waiting`. Flow parents are moved to `waiting-children` by the store.
    pub fn new(
        id: JobId,
        name: JobName,
        queue: impl Into<String>,
        payload: Value,
        options: JobOptions,
    ) -> Self {
        let now = Utc::now();
        let (state, run_at) = if options.delay_ms > 0 {
            let delay = chrono::Duration::milliseconds(
                i64::try_from(options.delay_ms).unwrap_or(i64::MAX),
            );
            let run_at = now
                .checked_add_signed(delay)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            (JobState::Delayed, Some(run_at))
        } else {
            (JobState::Waiting, None)
        };

        Self {
            id,
            name,
            queue: queue.into(),
            payload,
            options,
            state,
            progress: None,
            result: None,
            failed_reason: None,
            attempts_made: 0,
            stalled_count: 0,
            parent: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            run_at,
        }
    }

    /// Attach a parent reference.
    pub fn with_parent(mut self, parent: ParentRef) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Whether another attempt is allowed after the current one fails.
    ///
    /// `attempts_made` must already include the attempt that just failed.
    pub fn can_retry(&self) -> bool {
        self.attempts_made < self.options.attempts
    }

    /// Attempts still available.
    pub fn attempts_remaining(&self) -> u32 {
        self.options.attempts.saturating_sub(self.attempts_made)
    }
}

/// Read-only snapshot returned by status lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    /// Job identifier.
    pub id: JobId,
    /// Job name.
    pub name: JobName,
    /// Queue name.
    pub queue: String,
    /// Current state.
    pub state: JobState,
    /// Last reported progress.
    pub progress: Option<JobProgress>,
    /// Result on completion.
    pub result: Option<Value>,
    /// Failure reason.
    pub error: Option<String>,
    /// Attempts made so far.
    pub attempts_made: u32,
    /// Configured attempt budget.
    pub max_attempts: u32,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// First pick-up by a worker.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobStatus {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            name: job.name,
            queue: job.queue.clone(),
            state: job.state,
            progress: job.progress.clone(),
            result: job.result.clone(),
            error: job.failed_reason.clone(),
            attempts_made: job.attempts_made,
            max_attempts: job.options.attempts,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

impl From<Job> for JobStatus {
    fn from(job: Job) -> Self {
        Self::from(&job)
    }
}
