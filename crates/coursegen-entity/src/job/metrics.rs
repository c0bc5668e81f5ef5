//! Per-queue job counts.

use serde::{Deserialize, Serialize};

use super::state::JobState;

/// Counts per state for one queue.
///
/// Counts are read without a global snapshot and may be slightly stale
/// under concurrent mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// Queue name.
    pub queue: String,
    /// Jobs ready to be claimed.
    pub waiting: u64,
    /// Jobs currently leased.
    pub active: u64,
    /// Jobs scheduled for later.
    pub delayed: u64,
    /// Flow parents gated on children.
    pub waiting_children: u64,
    /// Retained completed jobs.
    pub completed: u64,
    /// Retained failed jobs.
    pub failed: u64,
}

impl QueueMetrics {
    /// Empty metrics for `queue`.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Self::default()
        }
    }

    /// Count for one state.
    pub fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Waiting => self.waiting,
            JobState::Active => self.active,
            JobState::Delayed => self.delayed,
            JobState::WaitingChildren => self.waiting_children,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
        }
    }

    /// Set the count for one state.
    pub fn set(&mut self, state: JobState, count: u64) {
        let slot = match state {
            JobState::Waiting => &mut self.waiting,
            JobState::Active => &mut self.active,
            JobState::Delayed => &mut self.delayed,
            JobState::WaitingChildren => &mut self.waiting_children,
            JobState::Completed => &mut self.completed,
            JobState::Failed => &mut self.failed,
        };
        *slot = count;
    }

    /// Jobs not yet terminal.
    pub fn outstanding(&self) -> u64 {
        self.waiting + self.active + self.delayed + self.waiting_children
    }
}
