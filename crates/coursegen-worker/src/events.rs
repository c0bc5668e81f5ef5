//! Typed worker lifecycle events.
//!
//! The pool publishes these on a broadcast channel for logging and
//! observability. They are a side channel: a processor's result or error is
//! delivered to the queue store regardless of whether anyone listens.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use coursegen_core::types::JobId;
use coursegen_entity::job::{JobName, JobProgress};
use coursegen_queue::StalledOutcome;

/// Capacity of the event channel.
pub const EVENT_BUFFER: usize = 256;

/// A worker lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// An attempt started.
    Active {
        job_id: JobId,
        name: JobName,
        attempt: u32,
    },
    /// A processor reported progress.
    Progress { job_id: JobId, progress: JobProgress },
    /// An attempt succeeded.
    Completed {
        job_id: JobId,
        name: JobName,
        duration_ms: u64,
    },
    /// An attempt failed.
    Failed {
        job_id: JobId,
        name: JobName,
        reason: String,
        attempts_made: u32,
        will_retry: bool,
    },
    /// The stalled checker recovered a job with an expired lease.
    Stalled {
        job_id: JobId,
        outcome: StalledOutcome,
    },
    /// This worker no longer holds the lease on a job it was running.
    LockLost { job_id: JobId },
    /// A worker-level error, such as a lost store connection.
    Error { message: String },
    /// The pool shut down.
    Closed,
}

/// Spawn a task that turns worker events into log lines.
///
/// The task ends after the `Closed` event or when the channel closes.
pub fn spawn_event_logger(mut rx: broadcast::Receiver<WorkerEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(WorkerEvent::Closed) => {
                    info!("Worker pool closed");
                    break;
                }
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged behind, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &WorkerEvent) {
    match event {
        WorkerEvent::Active {
            job_id,
            name,
            attempt,
        } => info!(job_id = %job_id, job_name = %name, attempt, "Job active"),
        WorkerEvent::Progress { job_id, progress } => debug!(
            job_id = %job_id,
            step = ?progress.step,
            percentage = progress.percentage,
            "{}",
            progress.message
        ),
        WorkerEvent::Completed {
            job_id,
            name,
            duration_ms,
        } => info!(job_id = %job_id, job_name = %name, duration_ms, "Job completed"),
        WorkerEvent::Failed {
            job_id,
            name,
            reason,
            attempts_made,
            will_retry,
        } => {
            if *will_retry {
                warn!(
                    job_id = %job_id,
                    job_name = %name,
                    attempts_made,
                    reason = %reason,
                    "Job attempt failed, retry scheduled"
                );
            } else {
                error!(
                    job_id = %job_id,
                    job_name = %name,
                    attempts_made,
                    reason = %reason,
                    "Job failed"
                );
            }
        }
        WorkerEvent::Stalled { job_id, outcome } => {
            warn!(job_id = %job_id, outcome = ?outcome, "Job stalled")
        }
        WorkerEvent::LockLost { job_id } => {
            warn!(job_id = %job_id, "Lost lease on job, result discarded")
        }
        WorkerEvent::Error { message } => error!(error = %message, "Worker error"),
        WorkerEvent::Closed => info!("Worker pool closed"),
    }
}
