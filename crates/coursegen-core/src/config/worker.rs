//! Worker pool configuration.

use serde::{Deserialize, Serialize};

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of jobs processed concurrently by one pool instance.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Queues to claim from, in priority order.
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,
    /// Interval in milliseconds between claim attempts when the queues are empty.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Lease duration in milliseconds.
    #[serde(default = "default_lock_duration")]
    pub lock_duration_ms: u64,
    /// Lease renewal interval in milliseconds (defaults to half the lease).
    #[serde(default)]
    pub lock_renew_interval_ms: Option<u64>,
    /// Interval in milliseconds between stalled-job checks.
    #[serde(default = "default_stalled_interval")]
    pub stalled_interval_ms: u64,
    /// Number of times a job may stall before it is failed.
    #[serde(default = "default_max_stalled_count")]
    pub max_stalled_count: u32,
    /// Optional cap on job starts per time window.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Seconds to wait for in-flight jobs on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

impl WorkerConfig {
    /// Effective lease renewal interval in milliseconds.
    pub fn lock_renew_interval_ms(&self) -> u64 {
        self.lock_renew_interval_ms
            .unwrap_or(self.lock_duration_ms / 2)
            .max(1)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queues: default_queues(),
            poll_interval_ms: default_poll_interval(),
            lock_duration_ms: default_lock_duration(),
            lock_renew_interval_ms: None,
            stalled_interval_ms: default_stalled_interval(),
            max_stalled_count: default_max_stalled_count(),
            rate_limit: None,
            shutdown_timeout_seconds: default_shutdown_timeout(),
        }
    }
}

/// Rate limit: at most `max` job starts per `duration_ms`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum job starts per window.
    pub max: u32,
    /// Window length in milliseconds.
    pub duration_ms: u64,
}

fn default_concurrency() -> usize {
    4
}

fn default_queues() -> Vec<String> {
    vec![
        "course-generation".to_string(),
        "lesson-generation".to_string(),
        "notifications".to_string(),
    ]
}

fn default_poll_interval() -> u64 {
    1_000
}

fn default_lock_duration() -> u64 {
    30_000
}

fn default_stalled_interval() -> u64 {
    30_000
}

fn default_max_stalled_count() -> u32 {
    1
}

fn default_shutdown_timeout() -> u64 {
    30
}
