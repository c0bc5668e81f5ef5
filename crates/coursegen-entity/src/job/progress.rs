//! Structured job progress pushed by processors and polled by observers.

use serde::{Deserialize, Serialize};

/// Step a generation job is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStep {
    Initializing,
    GeneratingOutline,
    GeneratingSections,
    Finalizing,
    Storing,
    CollectingResults,
    Delivering,
    Done,
}

/// Optional nested detail, e.g. "lesson 3 of 8".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressDetail {
    /// Current item (1-based for display).
    pub current: u32,
    /// Total items.
    pub total: u32,
}

/// Progress snapshot. A later report always replaces an earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Current step.
    pub step: GenerationStep,
    /// Completion percentage, 0–100.
    pub percentage: u8,
    /// Human-readable message.
    pub message: String,
    /// Optional nested detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<ProgressDetail>,
}

impl JobProgress {
    /// Create a progress snapshot; the percentage is clamped to 100.
    pub fn new(step: GenerationStep, percentage: u8, message: impl Into<String>) -> Self {
        Self {
            step,
            percentage: percentage.min(100),
            message: message.into(),
            detail: None,
        }
    }

    /// Attach a "current / total" detail.
    pub fn with_detail(mut self, current: u32, total: u32) -> Self {
        self.detail = Some(ProgressDetail { current, total });
        self
    }
}
