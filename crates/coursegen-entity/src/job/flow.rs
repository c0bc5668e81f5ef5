//! Flow registration types and the children results a parent reads.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use coursegen_core::types::JobId;

use super::options::EnqueueOptions;
use super::payload::JobPayload;

/// One job of a flow: its payload plus enqueue overrides.
#[derive(Debug, Clone)]
pub struct FlowNode {
    /// Typed payload; selects the job name.
    pub payload: JobPayload,
    /// Overrides applied on top of the default policy.
    pub options: EnqueueOptions,
}

impl FlowNode {
    /// Node with default options.
    pub fn new(payload: impl Into<JobPayload>) -> Self {
        Self {
            payload: payload.into(),
            options: EnqueueOptions::default(),
        }
    }

    /// Replace the overrides.
    pub fn with_options(mut self, options: EnqueueOptions) -> Self {
        self.options = options;
        self
    }
}

/// Handle returned by flow registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowHandle {
    /// Aggregator job.
    pub parent_job_id: JobId,
    /// Children in registration order.
    pub child_job_ids: Vec<JobId>,
    /// Number of children.
    pub child_count: usize,
}

/// Terminal outcomes of a parent's children, keyed by child job id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildrenValues {
    /// Results of children that completed.
    pub completed: BTreeMap<JobId, Value>,
    /// Failure reasons of children that exhausted their attempts.
    pub failed: BTreeMap<JobId, String>,
}

impl ChildrenValues {
    /// Number of children with a terminal outcome.
    pub fn terminal_count(&self) -> usize {
        self.completed.len() + self.failed.len()
    }

    /// Decode every completed result as `T`.
    ///
    /// Results that do not decode are returned separately with the reason,
    /// so the caller can treat them like failed children.
    pub fn decode<T: DeserializeOwned>(&self) -> (Vec<(JobId, T)>, Vec<(JobId, String)>) {
        let mut decoded = Vec::with_capacity(self.completed.len());
        let mut rejected = Vec::new();
        for (id, value) in &self.completed {
            match serde_json::from_value::<T>(value.clone()) {
                Ok(v) => decoded.push((id.clone(), v)),
                Err(e) => rejected.push((id.clone(), e.to_string())),
            }
        }
        (decoded, rejected)
    }
}
