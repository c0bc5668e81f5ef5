//! In-memory queue store.
//!
//! Every primitive runs under one Tokio mutex, which makes each of them
//! atomic. Suitable for tests and single-process deployments only.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use coursegen_core::error::AppError;
use coursegen_core::result::AppResult;
use coursegen_core::types::JobId;
use coursegen_entity::job::{
    ChildrenValues, Job, JobName, JobProgress, JobState, KeepPolicy, ParentRef, QueueMetrics,
};

use crate::store::{AddOutcome, QueueStore, STALLED_REASON, StalledJob, StalledOutcome};

/// Lease held on an active job.
#[derive(Debug)]
struct Lock {
    token: String,
    expires_at: Instant,
}

/// A stored job plus its ordering sequence and lease.
#[derive(Debug)]
struct Entry {
    job: Job,
    seq: u64,
    lock: Option<Lock>,
}

#[derive(Debug, Default)]
struct InnerState {
    jobs: HashMap<JobId, Entry>,
    next_seq: u64,
    dedupe: HashMap<(JobName, String), JobId>,
    /// Children of each parent that are not terminal yet.
    pending_children: HashMap<JobId, HashSet<JobId>>,
    /// Terminal outcomes of each parent's children.
    children: HashMap<JobId, ChildrenValues>,
}

impl InnerState {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn insert(&mut self, job: Job) {
        let seq = self.next_seq();
        if let Some(key) = job.options.dedupe_key.clone() {
            self.dedupe.insert((job.name, key), job.id.clone());
        }
        self.jobs.insert(
            job.id.clone(),
            Entry {
                job,
                seq,
                lock: None,
            },
        );
    }

    fn is_outstanding(&self, id: &JobId) -> bool {
        self.jobs
            .get(id)
            .is_some_and(|entry| entry.job.state.is_pending())
    }

    /// Put a job back at the end of its priority band.
    fn move_to_waiting(&mut self, id: &JobId) {
        let seq = self.next_seq();
        if let Some(entry) = self.jobs.get_mut(id) {
            entry.job.state = JobState::Waiting;
            entry.job.run_at = None;
            entry.seq = seq;
            entry.lock = None;
        }
    }

    fn promote_delayed(&mut self, queue: &str) {
        let now = Utc::now();
        let due: Vec<JobId> = self
            .jobs
            .values()
            .filter(|e| e.job.queue == queue && e.job.state == JobState::Delayed)
            .filter(|e| e.job.run_at.is_none_or(|at| at <= now))
            .map(|e| e.job.id.clone())
            .collect();

        for id in due {
            self.move_to_waiting(&id);
        }
    }

    fn next_waiting(&self, queue: &str) -> Option<JobId> {
        self.jobs
            .values()
            .filter(|e| e.job.queue == queue && e.job.state == JobState::Waiting)
            .min_by_key(|e| (e.job.options.priority, e.seq))
            .map(|e| e.job.id.clone())
    }

    /// Verify that `token` still owns the lease on an active job.
    fn check_lock(&self, id: &JobId, token: &str) -> AppResult<()> {
        let entry = self
            .jobs
            .get(id)
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;

        let held = entry.job.state == JobState::Active
            && entry
                .lock
                .as_ref()
                .is_some_and(|lock| lock.token == token && lock.expires_at > Instant::now());

        if held {
            Ok(())
        } else {
            Err(AppError::conflict(format!(
                "Lock for job {id} is no longer held by this worker"
            )))
        }
    }

    /// Record a child's terminal outcome on its parent.
    ///
    /// Returns `true` when this was the parent's last pending child and the
    /// parent was released to `waiting`.
    fn finish_child(
        &mut self,
        parent: &ParentRef,
        child: &JobId,
        outcome: Result<Value, String>,
    ) -> bool {
        let values = self.children.entry(parent.id.clone()).or_default();
        match outcome {
            Ok(value) => {
                values.completed.insert(child.clone(), value);
            }
            Err(reason) => {
                values.failed.insert(child.clone(), reason);
            }
        }

        let remaining = match self.pending_children.get_mut(&parent.id) {
            Some(pending) => {
                pending.remove(child);
                pending.len()
            }
            None => 0,
        };

        let gated = self
            .jobs
            .get(&parent.id)
            .is_some_and(|e| e.job.state == JobState::WaitingChildren);

        if remaining == 0 && gated {
            self.pending_children.remove(&parent.id);
            self.move_to_waiting(&parent.id);
            debug!(parent_id = %parent.id, "All children terminal, parent released");
            return true;
        }
        false
    }

    /// Fail a job terminally. Returns `true` if a parent was released.
    fn fail_terminal(&mut self, id: &JobId, reason: &str) -> bool {
        let Some(entry) = self.jobs.get_mut(id) else {
            return false;
        };
        entry.job.state = JobState::Failed;
        entry.job.failed_reason = Some(reason.to_string());
        entry.job.finished_at = Some(Utc::now());
        entry.lock = None;

        let parent = entry.job.parent.clone();
        let queue = entry.job.queue.clone();
        let keep = entry.job.options.remove_on_fail;

        let released = parent
            .map(|p| self.finish_child(&p, id, Err(reason.to_string())))
            .unwrap_or(false);
        self.trim(&queue, JobState::Failed, keep);
        released
    }

    /// Finished jobs of one queue and state, newest first.
    fn finished_newest_first(
        &self,
        queue: &str,
        state: JobState,
    ) -> Vec<(DateTime<Utc>, u64, JobId)> {
        let mut finished: Vec<(DateTime<Utc>, u64, JobId)> = self
            .jobs
            .values()
            .filter(|e| e.job.queue == queue && e.job.state == state)
            .map(|e| {
                let at = e.job.finished_at.unwrap_or(e.job.created_at);
                (at, e.seq, e.job.id.clone())
            })
            .collect();
        finished.sort_by(|a, b| b.cmp(a));
        finished
    }

    /// Apply a job's retention policy: drop finished jobs older than the
    /// policy's age or beyond its count.
    fn trim(&mut self, queue: &str, state: JobState, keep: KeepPolicy) -> u64 {
        let cutoff = cutoff(Duration::from_secs(keep.age_seconds));
        let doomed: Vec<JobId> = self
            .finished_newest_first(queue, state)
            .into_iter()
            .enumerate()
            .filter(|(index, (at, _, _))| {
                *index as u64 >= keep.count || cutoff.is_some_and(|c| *at < c)
            })
            .map(|(_, (_, _, id))| id)
            .collect();
        self.remove_all(doomed)
    }

    /// Drop finished jobs older than `older_than`, always keeping the newest `keep`.
    fn sweep(&mut self, queue: &str, state: JobState, older_than: Duration, keep: u64) -> u64 {
        let Some(cutoff) = cutoff(older_than) else {
            return 0;
        };
        let doomed: Vec<JobId> = self
            .finished_newest_first(queue, state)
            .into_iter()
            .skip(usize::try_from(keep).unwrap_or(usize::MAX))
            .filter(|(at, _, _)| *at < cutoff)
            .map(|(_, _, id)| id)
            .collect();
        self.remove_all(doomed)
    }

    fn remove_all(&mut self, ids: Vec<JobId>) -> u64 {
        let removed = ids.len() as u64;
        for id in ids {
            self.remove(&id);
        }
        removed
    }

    fn remove(&mut self, id: &JobId) {
        self.jobs.remove(id);
        self.pending_children.remove(id);
        self.children.remove(id);
        self.dedupe.retain(|_, existing| existing != id);
    }
}

/// Earliest finish time that is still kept, or `None` when the age
/// reaches further back than representable.
fn cutoff(age: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
}

fn run_at_after(delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| Utc::now().checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// In-memory [`QueueStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryQueueStore {
    state: Arc<Mutex<InnerState>>,
    notify: Arc<Notify>,
}

impl MemoryQueueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn wake(&self) {
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn add_job(&self, job: Job) -> AppResult<AddOutcome> {
        let mut state = self.state.lock().await;

        if state.jobs.contains_key(&job.id) {
            return Ok(AddOutcome::Duplicate(job.id));
        }

        if let Some(key) = &job.options.dedupe_key {
            if let Some(existing) = state.dedupe.get(&(job.name, key.clone())) {
                if state.is_outstanding(existing) {
                    return Ok(AddOutcome::Duplicate(existing.clone()));
                }
            }
        }

        let id = job.id.clone();
        state.insert(job);
        drop(state);

        self.wake();
        Ok(AddOutcome::Created(id))
    }

    async fn add_flow(&self, mut parent: Job, children: Vec<Job>) -> AppResult<()> {
        let mut state = self.state.lock().await;

        let mut seen = HashSet::with_capacity(children.len() + 1);
        let mut seen_keys = HashSet::new();
        for job in std::iter::once(&parent).chain(children.iter()) {
            let id = &job.id;
            if state.jobs.contains_key(id) || !seen.insert(id.clone()) {
                return Err(AppError::conflict(format!("Job id {id} is already registered")));
            }
            if let Some(key) = &job.options.dedupe_key {
                let dedupe = (job.name, key.clone());
                if let Some(existing) = state.dedupe.get(&dedupe) {
                    if state.is_outstanding(existing) {
                        return Err(AppError::conflict(format!(
                            "Dedupe key '{key}' of job {id} is held by outstanding job {existing}"
                        )));
                    }
                }
                if !seen_keys.insert(dedupe) {
                    return Err(AppError::conflict(format!(
                        "Dedupe key '{key}' is used twice in one flow"
                    )));
                }
            }
        }

        parent.state = JobState::WaitingChildren;
        parent.run_at = None;
        let parent_ref = ParentRef {
            id: parent.id.clone(),
            queue: parent.queue.clone(),
        };

        state.pending_children.insert(
            parent.id.clone(),
            children.iter().map(|c| c.id.clone()).collect(),
        );
        state
            .children
            .insert(parent.id.clone(), ChildrenValues::default());
        state.insert(parent);
        for child in children {
            state.insert(child.with_parent(parent_ref.clone()));
        }
        drop(state);

        self.wake();
        Ok(())
    }

    async fn claim(
        &self,
        queue: &str,
        token: &str,
        lock_duration: Duration,
    ) -> AppResult<Option<Job>> {
        let mut state = self.state.lock().await;
        state.promote_delayed(queue);

        let Some(id) = state.next_waiting(queue) else {
            return Ok(None);
        };

        let Some(entry) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        entry.job.state = JobState::Active;
        if entry.job.started_at.is_none() {
            entry.job.started_at = Some(Utc::now());
        }
        entry.lock = Some(Lock {
            token: token.to_string(),
            expires_at: Instant::now() + lock_duration,
        });

        Ok(Some(entry.job.clone()))
    }

    async fn extend_lock(
        &self,
        job_id: &JobId,
        token: &str,
        lock_duration: Duration,
    ) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        if state.check_lock(job_id, token).is_err() {
            return Ok(false);
        }
        if let Some(lock) = state.jobs.get_mut(job_id).and_then(|e| e.lock.as_mut()) {
            lock.expires_at = Instant::now() + lock_duration;
        }
        Ok(true)
    }

    async fn complete(&self, job_id: &JobId, token: &str, result: Value) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.check_lock(job_id, token)?;

        let Some(entry) = state.jobs.get_mut(job_id) else {
            return Err(AppError::not_found(format!("Job {job_id} not found")));
        };
        entry.job.state = JobState::Completed;
        entry.job.attempts_made += 1;
        entry.job.result = Some(result.clone());
        entry.job.finished_at = Some(Utc::now());
        entry.lock = None;

        let parent = entry.job.parent.clone();
        let queue = entry.job.queue.clone();
        let keep = entry.job.options.remove_on_complete;

        let released = parent
            .map(|p| state.finish_child(&p, job_id, Ok(result)))
            .unwrap_or(false);
        state.trim(&queue, JobState::Completed, keep);
        drop(state);

        if released {
            self.wake();
        }
        Ok(())
    }

    async fn fail(
        &self,
        job_id: &JobId,
        token: &str,
        reason: &str,
        retry_after: Option<Duration>,
    ) -> AppResult<JobState> {
        let mut state = self.state.lock().await;
        state.check_lock(job_id, token)?;

        let Some(entry) = state.jobs.get_mut(job_id) else {
            return Err(AppError::not_found(format!("Job {job_id} not found")));
        };
        entry.job.attempts_made += 1;
        entry.job.failed_reason = Some(reason.to_string());
        entry.lock = None;

        let retry = retry_after.filter(|_| entry.job.can_retry());
        let new_state = match retry {
            Some(delay) if delay.is_zero() => {
                state.move_to_waiting(job_id);
                JobState::Waiting
            }
            Some(delay) => {
                if let Some(entry) = state.jobs.get_mut(job_id) {
                    entry.job.state = JobState::Delayed;
                    entry.job.run_at = Some(run_at_after(delay));
                }
                JobState::Delayed
            }
            None => {
                state.fail_terminal(job_id, reason);
                JobState::Failed
            }
        };
        drop(state);

        self.wake();
        Ok(new_state)
    }

    async fn update_progress(&self, job_id: &JobId, progress: &JobProgress) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let entry = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| AppError::not_found(format!("Job {job_id} not found")))?;
        entry.job.progress = Some(progress.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &JobId) -> AppResult<Option<Job>> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(job_id).map(|e| e.job.clone()))
    }

    async fn children_values(&self, parent_id: &JobId) -> AppResult<ChildrenValues> {
        let state = self.state.lock().await;
        Ok(state.children.get(parent_id).cloned().unwrap_or_default())
    }

    async fn counts(&self, queue: &str) -> AppResult<QueueMetrics> {
        let state = self.state.lock().await;
        let mut metrics = QueueMetrics::new(queue);
        for entry in state.jobs.values().filter(|e| e.job.queue == queue) {
            let current = metrics.get(entry.job.state);
            metrics.set(entry.job.state, current + 1);
        }
        Ok(metrics)
    }

    async fn clean(
        &self,
        queue: &str,
        state_filter: JobState,
        older_than: Duration,
        keep: u64,
    ) -> AppResult<u64> {
        if !state_filter.is_terminal() {
            return Ok(0);
        }

        let mut state = self.state.lock().await;
        let removed = state.sweep(queue, state_filter, older_than, keep);
        if removed > 0 {
            debug!(queue, state = %state_filter, removed, "Cleaned finished jobs");
        }
        Ok(removed)
    }

    async fn recover_stalled(
        &self,
        queue: &str,
        max_stalled_count: u32,
    ) -> AppResult<Vec<StalledJob>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let expired: Vec<JobId> = state
            .jobs
            .values()
            .filter(|e| e.job.queue == queue && e.job.state == JobState::Active)
            .filter(|e| e.lock.as_ref().is_none_or(|lock| lock.expires_at <= now))
            .map(|e| e.job.id.clone())
            .collect();

        let mut recovered = Vec::with_capacity(expired.len());
        for id in expired {
            let Some(entry) = state.jobs.get_mut(&id) else {
                continue;
            };
            entry.job.stalled_count += 1;
            entry.lock = None;

            if entry.job.stalled_count > max_stalled_count {
                warn!(
                    job_id = %id,
                    stalled_count = entry.job.stalled_count,
                    "Job failed after stalling"
                );
                state.fail_terminal(&id, STALLED_REASON);
                recovered.push(StalledJob {
                    job_id: id,
                    outcome: StalledOutcome::Failed,
                });
            } else {
                info!(job_id = %id, "Stalled job moved back to waiting");
                state.move_to_waiting(&id);
                recovered.push(StalledJob {
                    job_id: id,
                    outcome: StalledOutcome::Requeued,
                });
            }
        }
        drop(state);

        if !recovered.is_empty() {
            self.wake();
        }
        Ok(recovered)
    }

    async fn wait_for_work(&self, _queue: &str, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursegen_core::error::ErrorKind;
    use coursegen_entity::job::{EnqueueOptions, JobOptions};

    const QUEUE: &str = "course-generation";
    const LOCK: Duration = Duration::from_secs(30);

    fn job(id: &str) -> Job {
        Job::new(
            JobId::from(id),
            JobName::GenerateSingleLesson,
            QUEUE,
            serde_json::json!({ "id": id }),
            JobOptions::default(),
        )
    }

    fn job_with(id: &str, options: EnqueueOptions) -> Job {
        Job::new(
            JobId::from(id),
            JobName::GenerateLesson,
            QUEUE,
            serde_json::json!({}),
            options.apply(&JobOptions::default()),
        )
    }

    #[tokio::test]
    async fn test_claim_orders_by_priority_then_fifo() {
        let store = MemoryQueueStore::new();
        store.add_job(job_with("low-1", EnqueueOptions::default().with_priority(5))).await.unwrap();
        store.add_job(job_with("high", EnqueueOptions::default().with_priority(1))).await.unwrap();
        store.add_job(job_with("low-2", EnqueueOptions::default().with_priority(5))).await.unwrap();

        let mut order = Vec::new();
        while let Some(job) = store.claim(QUEUE, "t", LOCK).await.unwrap() {
            order.push(job.id.to_string());
        }
        assert_eq!(order, vec!["high", "low-1", "low-2"]);
    }

    #[tokio::test]
    async fn test_dedupe_while_outstanding() {
        let store = MemoryQueueStore::new();
        let opts = || EnqueueOptions::default().with_dedupe_key("user-1:loops");

        let first = store.add_job(job_with("a", opts())).await.unwrap();
        let second = store.add_job(job_with("b", opts())).await.unwrap();
        assert_eq!(first, AddOutcome::Created(JobId::from("a")));
        assert_eq!(second, AddOutcome::Duplicate(JobId::from("a")));

        let claimed = store.claim(QUEUE, "t", LOCK).await.unwrap().unwrap();
        store.complete(&claimed.id, "t", serde_json::json!(1)).await.unwrap();

        let third = store.add_job(job_with("c", opts())).await.unwrap();
        assert_eq!(third, AddOutcome::Created(JobId::from("c")));
    }

    #[tokio::test]
    async fn test_existing_id_is_duplicate() {
        let store = MemoryQueueStore::new();
        store.add_job(job("same")).await.unwrap();
        let outcome = store.add_job(job("same")).await.unwrap();
        assert_eq!(outcome, AddOutcome::Duplicate(JobId::from("same")));
        assert_eq!(store.counts(QUEUE).await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_flow_parent_gated_until_children_terminal() {
        let store = MemoryQueueStore::new();
        let parent = Job::new(
            JobId::from("parent"),
            JobName::FinalizeCourse,
            QUEUE,
            serde_json::json!({}),
            JobOptions::default(),
        );
        store
            .add_flow(parent, vec![job("c0"), job("c1")])
            .await
            .unwrap();

        let metrics = store.counts(QUEUE).await.unwrap();
        assert_eq!(metrics.waiting_children, 1);
        assert_eq!(metrics.waiting, 2);

        let first = store.claim(QUEUE, "t1", LOCK).await.unwrap().unwrap();
        let second = store.claim(QUEUE, "t2", LOCK).await.unwrap().unwrap();
        assert!(store.claim(QUEUE, "t3", LOCK).await.unwrap().is_none());

        store
            .complete(&second.id, "t2", serde_json::json!({ "index": 1 }))
            .await
            .unwrap();
        assert!(store.claim(QUEUE, "t3", LOCK).await.unwrap().is_none());

        let state = store.fail(&first.id, "t1", "engine down", None).await.unwrap();
        assert_eq!(state, JobState::Failed);

        let parent = store.claim(QUEUE, "t4", LOCK).await.unwrap().unwrap();
        assert_eq!(parent.id, JobId::from("parent"));

        let values = store.children_values(&parent.id).await.unwrap();
        assert_eq!(values.completed.len(), 1);
        assert_eq!(values.failed.get(&first.id).map(String::as_str), Some("engine down"));
    }

    #[tokio::test]
    async fn test_flow_rejects_taken_ids() {
        let store = MemoryQueueStore::new();
        store.add_job(job("taken")).await.unwrap();
        let err = store
            .add_flow(job("parent"), vec![job("taken")])
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(store.get_job(&JobId::from("parent")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_flow_with_outstanding_dedupe_key_writes_nothing() {
        let store = MemoryQueueStore::new();
        let keyed = |id: &str| {
            let options = EnqueueOptions::default().with_dedupe_key("user-1:rust-course");
            let mut parent = job_with(id, options);
            parent.name = JobName::FinalizeCourse;
            parent
        };
        store.add_flow(keyed("p-a"), vec![job("a0")]).await.unwrap();

        let err = store
            .add_flow(keyed("p-b"), vec![job("b0")])
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(store.get_job(&JobId::from("p-b")).await.unwrap().is_none());
        assert!(store.get_job(&JobId::from("b0")).await.unwrap().is_none());
        assert_eq!(store.counts(QUEUE).await.unwrap().waiting_children, 1);

        let twice = EnqueueOptions::default().with_dedupe_key("same");
        let err = store
            .add_flow(
                job("p-c"),
                vec![job_with("c0", twice.clone()), job_with("c1", twice)],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(store.get_job(&JobId::from("p-c")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_token_conflicts() {
        let store = MemoryQueueStore::new();
        store.add_job(job("a")).await.unwrap();
        let claimed = store.claim(QUEUE, "owner", LOCK).await.unwrap().unwrap();

        let err = store
            .complete(&claimed.id, "intruder", serde_json::json!(null))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(!store.extend_lock(&claimed.id, "intruder", LOCK).await.unwrap());
        assert!(store.extend_lock(&claimed.id, "owner", LOCK).await.unwrap());
    }

    #[tokio::test]
    async fn test_retry_then_exhaust() {
        let store = MemoryQueueStore::new();
        store
            .add_job(job_with("a", EnqueueOptions::default().with_attempts(2)))
            .await
            .unwrap();

        let claimed = store.claim(QUEUE, "t", LOCK).await.unwrap().unwrap();
        let state = store
            .fail(&claimed.id, "t", "boom", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(state, JobState::Delayed);
        assert!(store.claim(QUEUE, "t", LOCK).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(40)).await;
        let claimed = store.claim(QUEUE, "t", LOCK).await.unwrap().unwrap();
        let state = store
            .fail(&claimed.id, "t", "boom again", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(state, JobState::Failed);

        let job = store.get_job(&claimed.id).await.unwrap().unwrap();
        assert_eq!(job.attempts_made, 2);
        assert_eq!(job.failed_reason.as_deref(), Some("boom again"));
        assert!(job.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_stalled_requeued_then_failed() {
        let store = MemoryQueueStore::new();
        store.add_job(job("a")).await.unwrap();
        let short = Duration::from_millis(5);

        store.claim(QUEUE, "w1", short).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stalled = store.recover_stalled(QUEUE, 1).await.unwrap();
        assert_eq!(stalled[0].outcome, StalledOutcome::Requeued);

        let err = store
            .complete(&JobId::from("a"), "w1", serde_json::json!(null))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);

        store.claim(QUEUE, "w2", short).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stalled = store.recover_stalled(QUEUE, 1).await.unwrap();
        assert_eq!(stalled[0].outcome, StalledOutcome::Failed);

        let job = store.get_job(&JobId::from("a")).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failed_reason.as_deref(), Some(STALLED_REASON));
        assert_eq!(job.attempts_made, 0);
    }

    #[tokio::test]
    async fn test_live_lease_is_not_stalled() {
        let store = MemoryQueueStore::new();
        store.add_job(job("a")).await.unwrap();
        store.claim(QUEUE, "w1", LOCK).await.unwrap().unwrap();
        assert!(store.recover_stalled(QUEUE, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clean_keeps_newest_and_skips_pending() {
        let store = MemoryQueueStore::new();
        for i in 0..4 {
            store.add_job(job(&format!("done-{i}"))).await.unwrap();
            let claimed = store.claim(QUEUE, "t", LOCK).await.unwrap().unwrap();
            store.complete(&claimed.id, "t", serde_json::json!(i)).await.unwrap();
        }
        store.add_job(job("pending")).await.unwrap();

        let removed = store
            .clean(QUEUE, JobState::Completed, Duration::ZERO, 1)
            .await
            .unwrap();
        assert_eq!(removed, 3);
        assert!(store.get_job(&JobId::from("done-3")).await.unwrap().is_some());

        let removed = store
            .clean(QUEUE, JobState::Waiting, Duration::ZERO, 0)
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(store.counts(QUEUE).await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_completion_applies_retention_count() {
        let store = MemoryQueueStore::new();
        let keep_one = EnqueueOptions {
            remove_on_complete: Some(KeepPolicy {
                age_seconds: 3600,
                count: 1,
            }),
            ..EnqueueOptions::default()
        };
        for id in ["a", "b"] {
            store.add_job(job_with(id, keep_one.clone())).await.unwrap();
            let claimed = store.claim(QUEUE, "t", LOCK).await.unwrap().unwrap();
            store.complete(&claimed.id, "t", serde_json::json!(null)).await.unwrap();
        }
        assert_eq!(store.counts(QUEUE).await.unwrap().completed, 1);
        assert!(store.get_job(&JobId::from("b")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_progress_overwrites() {
        use coursegen_entity::job::GenerationStep;

        let store = MemoryQueueStore::new();
        store.add_job(job("a")).await.unwrap();
        let id = JobId::from("a");
        store
            .update_progress(&id, &JobProgress::new(GenerationStep::Initializing, 0, "start"))
            .await
            .unwrap();
        store
            .update_progress(&id, &JobProgress::new(GenerationStep::Storing, 90, "store"))
            .await
            .unwrap();
        let job = store.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.progress.map(|p| p.percentage), Some(90));
    }
}
