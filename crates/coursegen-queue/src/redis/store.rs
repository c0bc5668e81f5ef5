//! Redis implementation of [`QueueStore`].
//!
//! Job records are hashes of scalar fields; JSON is only used for opaque
//! values (payload, options, progress, result). Every multi-key transition
//! is one Lua script from [`super::scripts`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde_json::Value;
use tracing::{debug, info, warn};

use coursegen_core::error::{AppError, ErrorKind};
use coursegen_core::result::AppResult;
use coursegen_core::types::JobId;
use coursegen_entity::job::{
    ChildrenValues, Job, JobName, JobOptions, JobProgress, JobState, ParentRef, QueueMetrics,
};

use super::client::RedisClient;
use super::scripts;
use crate::keys::QueueKeys;
use crate::store::{AddOutcome, QueueStore, STALLED_REASON, StalledJob, StalledOutcome};

const LOST_LOCK: &str = "lost-lock";

/// Redis-backed queue store.
#[derive(Debug, Clone)]
pub struct RedisQueueStore {
    /// Redis client.
    client: RedisClient,
    /// Key builder.
    keys: QueueKeys,
}

impl RedisQueueStore {
    /// Create a store over a connected client.
    pub fn new(client: RedisClient, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            keys: QueueKeys::new(key_prefix),
        }
    }

    /// Map a Redis error to an AppError.
    fn map_err(e: redis::RedisError) -> AppError {
        AppError::with_source(ErrorKind::Queue, format!("Redis error: {e}"), e)
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Flatten a job into `field, value` pairs for the scripts.
    fn encode_job(&self, job: &Job) -> AppResult<Vec<(&'static str, String)>> {
        let options = &job.options;
        let mut fields = vec![
            ("id", job.id.to_string()),
            ("name", job.name.as_str().to_string()),
            ("queue", job.queue.clone()),
            ("data", serde_json::to_string(&job.payload)?),
            ("opts", serde_json::to_string(options)?),
            ("state", job.state.as_str().to_string()),
            ("attemptsMade", job.attempts_made.to_string()),
            ("stalledCount", job.stalled_count.to_string()),
            ("createdAt", job.created_at.timestamp_millis().to_string()),
            ("priority", options.priority.to_string()),
            ("maxAttempts", options.attempts.to_string()),
            ("keepCompleteAge", options.remove_on_complete.age_seconds.to_string()),
            ("keepCompleteCount", options.remove_on_complete.count.to_string()),
            ("keepFailAge", options.remove_on_fail.age_seconds.to_string()),
            ("keepFailCount", options.remove_on_fail.count.to_string()),
        ];
        if let Some(run_at) = job.run_at {
            fields.push(("runAt", run_at.timestamp_millis().to_string()));
        }
        if let Some(parent) = &job.parent {
            fields.push(("parentId", parent.id.to_string()));
            fields.push(("parentQueue", parent.queue.clone()));
        }
        if let Some(key) = &options.dedupe_key {
            fields.push(("dedupe", self.keys.dedupe(job.name, key)));
        }
        Ok(fields)
    }

    fn push_job(invocation: &mut redis::ScriptInvocation<'_>, fields: &[(&'static str, String)]) {
        invocation.arg(fields.len());
        for (field, value) in fields {
            invocation.arg(*field).arg(value);
        }
    }

    /// Rebuild a job from its hash fields.
    fn decode_job(map: &HashMap<String, String>) -> AppResult<Job> {
        let name = field(map, "name")?
            .parse::<JobName>()
            .map_err(AppError::queue)?;
        let state = field(map, "state")?
            .parse::<JobState>()
            .map_err(AppError::queue)?;
        let options: JobOptions = serde_json::from_str(field(map, "opts")?)?;
        let progress = json(map, "progress")?
            .map(serde_json::from_value::<JobProgress>)
            .transpose()?;
        let parent = match (map.get("parentId"), map.get("parentQueue")) {
            (Some(id), Some(queue)) => Some(ParentRef {
                id: JobId::from(id.as_str()),
                queue: queue.clone(),
            }),
            _ => None,
        };

        Ok(Job {
            id: JobId::from(field(map, "id")?),
            name,
            queue: field(map, "queue")?.to_string(),
            payload: serde_json::from_str(field(map, "data")?)?,
            options,
            state,
            progress,
            result: json(map, "returnvalue")?,
            failed_reason: map.get("failedReason").cloned(),
            attempts_made: counter(map, "attemptsMade")?,
            stalled_count: counter(map, "stalledCount")?,
            parent,
            created_at: timestamp(map, "createdAt").unwrap_or_else(Utc::now),
            started_at: timestamp(map, "startedAt"),
            finished_at: timestamp(map, "finishedAt"),
            run_at: timestamp(map, "runAt"),
        })
    }

    fn lost_lock(job_id: &JobId) -> AppError {
        AppError::conflict(format!(
            "Lock for job {job_id} is no longer held by this worker"
        ))
    }
}

fn field<'a>(map: &'a HashMap<String, String>, name: &str) -> AppResult<&'a str> {
    map.get(name)
        .map(String::as_str)
        .ok_or_else(|| AppError::queue(format!("Job record is missing field '{name}'")))
}

fn counter(map: &HashMap<String, String>, name: &str) -> AppResult<u32> {
    match map.get(name) {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|e| AppError::queue(format!("Job field '{name}' is not a number: {e}"))),
        None => Ok(0),
    }
}

fn timestamp(map: &HashMap<String, String>, name: &str) -> Option<DateTime<Utc>> {
    map.get(name)
        .and_then(|raw| raw.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
}

fn json(map: &HashMap<String, String>, name: &str) -> AppResult<Option<Value>> {
    match map.get(name) {
        Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn add_job(&self, job: Job) -> AppResult<AddOutcome> {
        let fields = self.encode_job(&job)?;
        let mut conn = self.client.conn_mut();

        let mut invocation = scripts::ADD_JOB_SCRIPT.prepare_invoke();
        invocation.arg(self.keys.prefix()).arg(Self::now_ms());
        Self::push_job(&mut invocation, &fields);

        let (status, id): (String, String) = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        let id = JobId::from(id);
        if status == "duplicate" {
            debug!(job_id = %id, "Job already outstanding, skipping add");
            Ok(AddOutcome::Duplicate(id))
        } else {
            Ok(AddOutcome::Created(id))
        }
    }

    async fn add_flow(&self, mut parent: Job, children: Vec<Job>) -> AppResult<()> {
        parent.state = JobState::WaitingChildren;
        parent.run_at = None;
        let parent_ref = ParentRef {
            id: parent.id.clone(),
            queue: parent.queue.clone(),
        };

        let mut encoded = Vec::with_capacity(children.len() + 1);
        encoded.push(self.encode_job(&parent)?);
        for child in children {
            encoded.push(self.encode_job(&child.with_parent(parent_ref.clone()))?);
        }

        let mut conn = self.client.conn_mut();
        let mut invocation = scripts::ADD_FLOW_SCRIPT.prepare_invoke();
        invocation
            .arg(self.keys.prefix())
            .arg(Self::now_ms())
            .arg(encoded.len());
        for fields in &encoded {
            Self::push_job(&mut invocation, fields);
        }

        let (status, id): (String, String) = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        match status.as_str() {
            "conflict" => Err(AppError::conflict(format!(
                "Job id {id} is already registered"
            ))),
            "dedupe" => Err(AppError::conflict(format!(
                "Flow dedupe key is held by outstanding job {id}"
            ))),
            _ => Ok(()),
        }
    }

    async fn claim(
        &self,
        queue: &str,
        token: &str,
        lock_duration: Duration,
    ) -> AppResult<Option<Job>> {
        let mut conn = self.client.conn_mut();
        let claimed: Option<String> = scripts::CLAIM_SCRIPT
            .arg(self.keys.prefix())
            .arg(Self::now_ms())
            .arg(queue)
            .arg(token)
            .arg(lock_duration.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        match claimed {
            Some(id) => self.get_job(&JobId::from(id)).await,
            None => Ok(None),
        }
    }

    async fn extend_lock(
        &self,
        job_id: &JobId,
        token: &str,
        lock_duration: Duration,
    ) -> AppResult<bool> {
        let mut conn = self.client.conn_mut();
        let extended: i64 = scripts::EXTEND_LOCK_SCRIPT
            .key(self.keys.lock(job_id))
            .arg(token)
            .arg(lock_duration.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(extended == 1)
    }

    async fn complete(&self, job_id: &JobId, token: &str, result: Value) -> AppResult<()> {
        let mut conn = self.client.conn_mut();
        let status: String = scripts::COMPLETE_SCRIPT
            .arg(self.keys.prefix())
            .arg(Self::now_ms())
            .arg(job_id.as_str())
            .arg(token)
            .arg(serde_json::to_string(&result)?)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        if status == LOST_LOCK {
            return Err(Self::lost_lock(job_id));
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
        let retry_ms = retry_after.map_or(-1, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));

        let mut conn = self.client.conn_mut();
        let status: String = scripts::FAIL_SCRIPT
            .arg(self.keys.prefix())
            .arg(Self::now_ms())
            .arg(job_id.as_str())
            .arg(token)
            .arg(reason)
            .arg(retry_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        if status == LOST_LOCK {
            return Err(Self::lost_lock(job_id));
        }
        status.parse::<JobState>().map_err(AppError::queue)
    }

    async fn update_progress(&self, job_id: &JobId, progress: &JobProgress) -> AppResult<()> {
        let mut conn = self.client.conn_mut();
        let updated: i64 = scripts::UPDATE_PROGRESS_SCRIPT
            .key(self.keys.job(job_id))
            .arg(serde_json::to_string(progress)?)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        if updated == 0 {
            return Err(AppError::not_found(format!("Job {job_id} not found")));
        }
        Ok(())
    }

    async fn get_job(&self, job_id: &JobId) -> AppResult<Option<Job>> {
        let key = self.keys.job(job_id);
        let map: HashMap<String, String> = self
            .client
            .policy()
            .retry("get_job", || {
                let mut conn = self.client.conn_mut();
                let key = key.clone();
                async move { conn.hgetall(&key).await.map_err(Self::map_err) }
            })
            .await?;

        if map.is_empty() {
            return Ok(None);
        }
        Self::decode_job(&map).map(Some)
    }

    async fn children_values(&self, parent_id: &JobId) -> AppResult<ChildrenValues> {
        let mut conn = self.client.conn_mut();
        let processed: HashMap<String, String> = conn
            .hgetall(self.keys.processed(parent_id))
            .await
            .map_err(Self::map_err)?;
        let failed: HashMap<String, String> = conn
            .hgetall(self.keys.failed_children(parent_id))
            .await
            .map_err(Self::map_err)?;

        let mut values = ChildrenValues::default();
        for (id, raw) in processed {
            let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
            values.completed.insert(JobId::from(id), value);
        }
        for (id, reason) in failed {
            values.failed.insert(JobId::from(id), reason);
        }
        Ok(values)
    }

    async fn counts(&self, queue: &str) -> AppResult<QueueMetrics> {
        let key = |state| self.keys.state(queue, state);
        let (waiting, active, delayed, waiting_children, completed, failed): (
            u64,
            u64,
            u64,
            u64,
            u64,
            u64,
        ) = self
            .client
            .policy()
            .retry("counts", || {
                let mut conn = self.client.conn_mut();
                let mut pipe = redis::pipe();
                pipe.zcard(key(JobState::Waiting))
                    .scard(key(JobState::Active))
                    .zcard(key(JobState::Delayed))
                    .scard(key(JobState::WaitingChildren))
                    .zcard(key(JobState::Completed))
                    .zcard(key(JobState::Failed));
                async move { pipe.query_async(&mut conn).await.map_err(Self::map_err) }
            })
            .await?;

        Ok(QueueMetrics {
            queue: queue.to_string(),
            waiting,
            active,
            delayed,
            waiting_children,
            completed,
            failed,
        })
    }

    async fn clean(
        &self,
        queue: &str,
        state: JobState,
        older_than: Duration,
        keep: u64,
    ) -> AppResult<u64> {
        if !state.is_terminal() {
            return Ok(0);
        }

        let mut conn = self.client.conn_mut();
        let removed: u64 = scripts::CLEAN_SCRIPT
            .arg(self.keys.prefix())
            .arg(Self::now_ms())
            .arg(queue)
            .arg(state.as_str())
            .arg(older_than.as_millis() as u64)
            .arg(keep)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        if removed > 0 {
            info!(queue, state = %state, removed, "Cleaned finished jobs");
        }
        Ok(removed)
    }

    async fn recover_stalled(
        &self,
        queue: &str,
        max_stalled_count: u32,
    ) -> AppResult<Vec<StalledJob>> {
        let mut conn = self.client.conn_mut();
        let flat: Vec<String> = scripts::RECOVER_STALLED_SCRIPT
            .arg(self.keys.prefix())
            .arg(Self::now_ms())
            .arg(queue)
            .arg(max_stalled_count)
            .arg(STALLED_REASON)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        let recovered = flat
            .chunks_exact(2)
            .map(|pair| StalledJob {
                job_id: JobId::from(pair[0].as_str()),
                outcome: if pair[1] == "failed" {
                    StalledOutcome::Failed
                } else {
                    StalledOutcome::Requeued
                },
            })
            .collect::<Vec<_>>();

        for stalled in &recovered {
            warn!(job_id = %stalled.job_id, outcome = ?stalled.outcome, "Recovered stalled job");
        }
        Ok(recovered)
    }

    async fn health_check(&self) -> AppResult<bool> {
        let mut conn = self.client.conn_mut();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(pong == "PONG")
    }
}
