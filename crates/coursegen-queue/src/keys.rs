//! Key builders for every queue store entry.
//!
//! The Lua scripts in [`crate::redis::scripts`] build the same keys from the
//! prefix; the two must stay in sync.

use coursegen_core::types::JobId;
use coursegen_entity::job::{JobName, JobState};

/// Key builder bound to one key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    prefix: String,
}

impl QueueKeys {
    /// Create a key builder for `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Return the key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    // ── Job keys ───────────────────────────────────────────────

    /// Hash holding the job record.
    pub fn job(&self, id: &JobId) -> String {
        format!("{}:job:{id}", self.prefix)
    }

    /// Lease key; its value is the owner's lock token.
    pub fn lock(&self, id: &JobId) -> String {
        format!("{}:job:{id}:lock", self.prefix)
    }

    /// Set of a parent's children that are not terminal yet.
    pub fn dependencies(&self, id: &JobId) -> String {
        format!("{}:job:{id}:deps", self.prefix)
    }

    /// Hash of a parent's completed children and their results.
    pub fn processed(&self, id: &JobId) -> String {
        format!("{}:job:{id}:processed", self.prefix)
    }

    /// Hash of a parent's failed children and their reasons.
    pub fn failed_children(&self, id: &JobId) -> String {
        format!("{}:job:{id}:failed", self.prefix)
    }

    // ── Queue keys ─────────────────────────────────────────────

    /// Per-state index of a queue.
    ///
    /// `waiting`, `delayed`, `completed` and `failed` are sorted sets;
    /// `active` and `waiting-children` are plain sets.
    pub fn state(&self, queue: &str, state: JobState) -> String {
        let kind = match state {
            JobState::Waiting => "wait",
            other => other.as_str(),
        };
        format!("{}:q:{queue}:{kind}", self.prefix)
    }

    // ── Misc ───────────────────────────────────────────────────

    /// Dedupe marker pointing at the outstanding job for a key.
    pub fn dedupe(&self, name: JobName, key: &str) -> String {
        format!("{}:dedupe:{name}:{key}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_keys() {
        let keys = QueueKeys::new("coursegen");
        let id = JobId::from("abc");
        assert_eq!(keys.job(&id), "coursegen:job:abc");
        assert_eq!(keys.lock(&id), "coursegen:job:abc:lock");
        assert_eq!(keys.dependencies(&id), "coursegen:job:abc:deps");
    }

    #[test]
    fn test_queue_keys() {
        let keys = QueueKeys::new("coursegen");
        assert_eq!(
            keys.state("course-generation", JobState::Waiting),
            "coursegen:q:course-generation:wait"
        );
        assert_eq!(
            keys.state("course-generation", JobState::WaitingChildren),
            "coursegen:q:course-generation:waiting-children"
        );
        assert_eq!(
            keys.dedupe(JobName::GenerateLesson, "u1:loops"),
            "coursegen:dedupe:generate-lesson:u1:loops"
        );
    }
}
