//! Job lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// State of a job in its queue.
///
/// ```text
/// waiting ──► active ──► completed
///    ▲          │
///    │          ├──► delayed ──► waiting   (retry with backoff)
///    │          └──► failed               (attempts exhausted)
/// waiting-children ──► waiting            (all children terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    /// Ready to be claimed by a worker.
    Waiting,
    /// Leased by a worker and running.
    Active,
    /// Finished with a result.
    Completed,
    /// Finished with an error after exhausting its attempts.
    Failed,
    /// Scheduled for a later time (initial delay or retry backoff).
    Delayed,
    /// Flow parent gated until all of its children are terminal.
    WaitingChildren,
}

impl JobState {
    /// Every state, in display order.
    pub const ALL: [JobState; 6] = [
        Self::Waiting,
        Self::Active,
        Self::Delayed,
        Self::WaitingChildren,
        Self::Completed,
        Self::Failed,
    ];

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a caller should keep polling for this job.
    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }

    /// Return the state as its wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Delayed => "delayed",
            Self::WaitingChildren => "waiting-children",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "delayed" => Ok(Self::Delayed),
            "waiting-children" => Ok(Self::WaitingChildren),
            other => Err(format!("unknown job state '{other}'")),
        }
    }
}
