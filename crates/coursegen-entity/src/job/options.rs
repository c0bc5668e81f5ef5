//! Per-job options: priority, retry/backoff, retention, and timeout.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use coursegen_core::config::jobs::{JobDefaultsConfig, KeepConfig};
use coursegen_core::types::JobId;

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// The same delay before every retry.
    Fixed,
    /// `delay * 2^(attempts_made - 1)` before each retry.
    Exponential,
}

/// Backoff policy applied when an attempt fails and attempts remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    /// Strategy.
    pub kind: BackoffKind,
    /// Base delay in milliseconds.
    pub delay_ms: u64,
}

impl Backoff {
    /// Exponential backoff starting at `delay_ms`.
    pub fn exponential(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay_ms,
        }
    }

    /// Fixed backoff of `delay_ms`.
    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            delay_ms,
        }
    }

    /// Delay before the next attempt, given how many attempts have been made.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let ms = match self.kind {
            BackoffKind::Fixed => self.delay_ms,
            BackoffKind::Exponential => {
                let exponent = attempts_made.saturating_sub(1).min(32);
                self.delay_ms.saturating_mul(1u64 << exponent)
            }
        };
        Duration::from_millis(ms)
    }
}

/// Retention policy for finished jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepPolicy {
    /// Finished jobs older than this are removed.
    pub age_seconds: u64,
    /// At most this many finished jobs are kept.
    pub count: u64,
}

impl From<KeepConfig> for KeepPolicy {
    fn from(config: KeepConfig) -> Self {
        Self {
            age_seconds: config.age_seconds,
            count: config.count,
        }
    }
}

/// Effective options of a stored job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Lower values are claimed first.
    pub priority: u32,
    /// Total attempts, first run included.
    pub attempts: u32,
    /// Delay policy between attempts.
    pub backoff: Backoff,
    /// Initial delay in milliseconds before the job becomes claimable.
    pub delay_ms: u64,
    /// Retention for the job once completed.
    pub remove_on_complete: KeepPolicy,
    /// Retention for the job once failed.
    pub remove_on_fail: KeepPolicy,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Deduplication key among outstanding jobs of the same name.
    pub dedupe_key: Option<String>,
}

impl JobOptions {
    /// Build options from the configured defaults.
    pub fn from_defaults(defaults: &JobDefaultsConfig) -> Self {
        let backoff = match defaults.backoff_kind.as_str() {
            "fixed" => Backoff::fixed(defaults.backoff_delay_ms),
            _ => Backoff::exponential(defaults.backoff_delay_ms),
        };

        Self {
            priority: 0,
            attempts: defaults.attempts.max(1),
            backoff,
            delay_ms: 0,
            remove_on_complete: defaults.remove_on_complete.into(),
            remove_on_fail: defaults.remove_on_fail.into(),
            timeout_ms: Some(defaults.timeout_ms).filter(|t| *t > 0),
            dedupe_key: None,
        }
    }

    /// Per-attempt timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self::from_defaults(&JobDefaultsConfig::default())
    }
}

/// Caller overrides applied on top of the default policy at enqueue time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Caller-supplied job id.
    pub job_id: Option<JobId>,
    /// Queue override (defaults to the job name's queue).
    pub queue: Option<String>,
    /// Priority override.
    pub priority: Option<u32>,
    /// Attempts override.
    pub attempts: Option<u32>,
    /// Backoff override.
    pub backoff: Option<Backoff>,
    /// Initial delay in milliseconds.
    pub delay_ms: Option<u64>,
    /// Timeout override in milliseconds (`0` disables the timeout).
    pub timeout_ms: Option<u64>,
    /// Deduplication key.
    pub dedupe_key: Option<String>,
    /// Completed-job retention override.
    pub remove_on_complete: Option<KeepPolicy>,
    /// Failed-job retention override.
    pub remove_on_fail: Option<KeepPolicy>,
}

impl EnqueueOptions {
    /// Use a caller-supplied job id.
    pub fn with_job_id(mut self, job_id: impl Into<JobId>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Place the job on a specific queue.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the total number of attempts.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Set the backoff policy.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Delay the first attempt.
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the deduplication key.
    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    /// Merge these overrides over `defaults`.
    pub fn apply(&self, defaults: &JobOptions) -> JobOptions {
        JobOptions {
            priority: self.priority.unwrap_or(defaults.priority),
            attempts: self.attempts.unwrap_or(defaults.attempts).max(1),
            backoff: self.backoff.unwrap_or(defaults.backoff),
            delay_ms: self.delay_ms.unwrap_or(defaults.delay_ms),
            remove_on_complete: self.remove_on_complete.unwrap_or(defaults.remove_on_complete),
            remove_on_fail: self.remove_on_fail.unwrap_or(defaults.remove_on_fail),
            timeout_ms: match self.timeout_ms {
                Some(0) => None,
                Some(ms) => Some(ms),
                None => defaults.timeout_ms,
            },
            dedupe_key: self
                .dedupe_key
                .clone()
                .or_else(|| defaults.dedupe_key.clone()),
        }
    }
}
