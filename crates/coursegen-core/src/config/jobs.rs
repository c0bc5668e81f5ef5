//! Default job policy and retention sweep configuration.

use serde::{Deserialize, Serialize};

/// Policy baked into every enqueue unless the caller overrides it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefaultsConfig {
    /// Total attempts per job (first run included).
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Backoff kind: `"exponential"` or `"fixed"`.
    #[serde(default = "default_backoff_kind")]
    pub backoff_kind: String,
    /// Base backoff delay in milliseconds.
    #[serde(default = "default_backoff_delay")]
    pub backoff_delay_ms: u64,
    /// Retention for completed jobs.
    #[serde(default = "default_keep_completed")]
    pub remove_on_complete: KeepConfig,
    /// Retention for failed jobs.
    #[serde(default = "default_keep_failed")]
    pub remove_on_fail: KeepConfig,
    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl Default for JobDefaultsConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff_kind: default_backoff_kind(),
            backoff_delay_ms: default_backoff_delay(),
            remove_on_complete: default_keep_completed(),
            remove_on_fail: default_keep_failed(),
            timeout_ms: default_timeout(),
        }
    }
}

/// How long and how many finished jobs are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepConfig {
    /// Maximum age in seconds.
    pub age_seconds: u64,
    /// Maximum number of jobs kept.
    pub count: u64,
}

/// Periodic retention sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Whether the sweep is scheduled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cron expression (with seconds) for the sweep.
    #[serde(default = "default_schedule")]
    pub schedule: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: default_schedule(),
        }
    }
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_kind() -> String {
    "exponential".to_string()
}

fn default_backoff_delay() -> u64 {
    5_000
}

fn default_keep_completed() -> KeepConfig {
    KeepConfig {
        age_seconds: 24 * 3600,
        count: 1_000,
    }
}

fn default_keep_failed() -> KeepConfig {
    KeepConfig {
        age_seconds: 7 * 24 * 3600,
        count: 5_000,
    }
}

fn default_timeout() -> u64 {
    300_000
}

fn default_true() -> bool {
    true
}

fn default_schedule() -> String {
    "0 0 * * * *".to_string()
}
