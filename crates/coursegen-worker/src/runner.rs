//! Worker pool: claims jobs, runs them under a lease, and records outcomes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use coursegen_core::config::worker::WorkerConfig;
use coursegen_core::error::{AppError, ErrorKind};
use coursegen_core::result::AppResult;
use coursegen_core::types::JobId;
use coursegen_entity::job::Job;
use coursegen_queue::QueueStore;

use crate::events::{EVENT_BUFFER, WorkerEvent};
use crate::executor::{JobContext, JobExecutionError, ProcessorRegistry, ProgressReporter};
use crate::rate_limit::RateLimiter;

/// Upper bound on the delay after consecutive store errors.
const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(30);
/// How long a finished attempt waits for its queued progress writes.
const PROGRESS_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared by the pool, its handle, and every job task.
#[derive(Debug)]
struct PoolInner {
    store: Arc<dyn QueueStore>,
    registry: ProcessorRegistry,
    config: WorkerConfig,
    worker_id: String,
    events: broadcast::Sender<WorkerEvent>,
    limiter: Option<RateLimiter>,
    semaphore: Arc<Semaphore>,
    running: AtomicBool,
}

/// A bounded pool of concurrently executing job processors.
#[derive(Debug)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a pool over `store` dispatching to `registry`.
    pub fn new(
        store: Arc<dyn QueueStore>,
        registry: ProcessorRegistry,
        config: WorkerConfig,
    ) -> Self {
        Self::with_worker_id(store, registry, config, format!("worker-{}", Uuid::new_v4()))
    }

    /// Create a pool with an explicit worker identifier.
    pub fn with_worker_id(
        store: Arc<dyn QueueStore>,
        registry: ProcessorRegistry,
        config: WorkerConfig,
        worker_id: impl Into<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let concurrency = config.concurrency.max(1);
        let limiter = config.rate_limit.as_ref().map(RateLimiter::from_config);

        Self {
            inner: Arc::new(PoolInner {
                store,
                registry,
                config,
                worker_id: worker_id.into(),
                events,
                limiter,
                semaphore: Arc::new(Semaphore::new(concurrency)),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.inner.events.subscribe()
    }

    /// Worker identifier.
    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    /// Whether the pool is currently started.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start claiming jobs.
    ///
    /// Returns the handle that owns the running pool. Starting a pool that
    /// is already running is rejected with `Conflict`.
    pub fn start(&self) -> AppResult<WorkerHandle> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::conflict(format!(
                "Worker pool '{}' is already running",
                self.inner.worker_id
            )));
        }

        let config = &self.inner.config;
        info!(
            worker_id = %self.inner.worker_id,
            concurrency = config.concurrency.max(1),
            queues = ?config.queues,
            lock_duration_ms = config.lock_duration_ms,
            rate_limited = self.inner.limiter.is_some(),
            processors = ?self.inner.registry.registered_names(),
            "Worker pool started"
        );

        let (cancel, cancel_rx) = watch::channel(false);
        let claim_task = tokio::spawn(Arc::clone(&self.inner).claim_loop(cancel_rx.clone()));
        let stalled_task = tokio::spawn(Arc::clone(&self.inner).stalled_loop(cancel_rx));

        Ok(WorkerHandle {
            inner: Arc::clone(&self.inner),
            cancel,
            claim_task,
            stalled_task,
        })
    }
}

/// Owns a running pool. Dropping it without [`WorkerHandle::shutdown`]
/// leaves the pool running.
#[derive(Debug)]
pub struct WorkerHandle {
    inner: Arc<PoolInner>,
    cancel: watch::Sender<bool>,
    claim_task: JoinHandle<()>,
    stalled_task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Worker identifier.
    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.inner.events.subscribe()
    }

    /// Stop claiming, wait for in-flight jobs (bounded), and close.
    ///
    /// Jobs still running when the timeout elapses are abandoned and keep
    /// the pool marked as running until they return, so it cannot be
    /// restarted over them.
    pub async fn shutdown(self) -> AppResult<()> {
        let inner = self.inner;
        info!(worker_id = %inner.worker_id, "Worker pool shutting down");

        let _ = self.cancel.send(true);
        if let Err(e) = self.claim_task.await {
            error!(worker_id = %inner.worker_id, error = %e, "Claim loop ended abnormally");
        }
        if let Err(e) = self.stalled_task.await {
            error!(worker_id = %inner.worker_id, error = %e, "Stalled checker ended abnormally");
        }

        info!(worker_id = %inner.worker_id, "Waiting for in-flight jobs to complete");
        let permits = u32::try_from(inner.config.concurrency.max(1)).unwrap_or(u32::MAX);
        let timeout = Duration::from_secs(inner.config.shutdown_timeout_seconds);
        let drained = match time::timeout(timeout, inner.semaphore.acquire_many(permits)).await {
            Ok(Ok(_permits)) => true,
            Ok(Err(_)) => false,
            Err(_) => false,
        };

        if drained {
            inner.running.store(false, Ordering::SeqCst);
        } else {
            // Abandoned jobs still hold permits and leases; the pool stays
            // marked as running until the last of them returns its permit.
            let pending = Arc::clone(&inner);
            tokio::spawn(async move {
                if let Ok(_permits) = pending.semaphore.acquire_many(permits).await {
                    pending.running.store(false, Ordering::SeqCst);
                    debug!(worker_id = %pending.worker_id, "Abandoned jobs finished");
                }
            });
        }
        let _ = inner.events.send(WorkerEvent::Closed);

        if drained {
            info!(worker_id = %inner.worker_id, "Worker pool shut down complete");
            Ok(())
        } else {
            warn!(
                worker_id = %inner.worker_id,
                timeout_seconds = inner.config.shutdown_timeout_seconds,
                "In-flight jobs did not finish before the shutdown timeout"
            );
            Err(AppError::timeout(
                "In-flight jobs did not finish before the shutdown timeout",
            ))
        }
    }
}

/// Aborts the lease renewal task when dropped, whichever way the attempt ends.
#[derive(Debug)]
struct LeaseRenewal(JoinHandle<()>);

impl Drop for LeaseRenewal {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "unknown panic payload".to_string(),
        },
    }
}

impl PoolInner {
    fn lock_duration(&self) -> Duration {
        Duration::from_millis(self.config.lock_duration_ms.max(1))
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms.max(1))
    }

    fn publish(&self, event: WorkerEvent) {
        let _ = self.events.send(event);
    }

    /// Main loop: wait for a free slot, respect the rate limit, claim.
    async fn claim_loop(self: Arc<Self>, mut cancel: watch::Receiver<bool>) {
        let mut consecutive_errors = 0u32;

        loop {
            if *cancel.borrow() {
                break;
            }

            let permit = tokio::select! {
                _ = cancel.changed() => break,
                permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if let Some(limiter) = &self.limiter {
                tokio::select! {
                    _ = cancel.changed() => break,
                    _ = limiter.until_ready() => {}
                }
            }

            match self.claim_next().await {
                Ok(Some((job, token))) => {
                    consecutive_errors = 0;
                    if let Some(limiter) = &self.limiter {
                        limiter.record().await;
                    }
                    tokio::spawn(Arc::clone(&self).run_job(job, token, permit));
                }
                Ok(None) => {
                    consecutive_errors = 0;
                    drop(permit);
                    trace!(worker_id = %self.worker_id, "No jobs available");
                    let queue = self.config.queues.first().map(String::as_str).unwrap_or("");
                    tokio::select! {
                        _ = cancel.changed() => break,
                        _ = self.store.wait_for_work(queue, self.poll_interval()) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    let delay = self.error_backoff(consecutive_errors);
                    error!(
                        worker_id = %self.worker_id,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Failed to claim job"
                    );
                    self.publish(WorkerEvent::Error {
                        message: e.to_string(),
                    });
                    tokio::select! {
                        _ = cancel.changed() => break,
                        _ = time::sleep(delay) => {}
                    }
                }
            }
        }

        debug!(worker_id = %self.worker_id, "Claim loop stopped");
    }

    fn error_backoff(&self, consecutive_errors: u32) -> Duration {
        let exponent = consecutive_errors.saturating_sub(1).min(10);
        self.poll_interval()
            .checked_mul(1u32 << exponent)
            .unwrap_or(MAX_ERROR_BACKOFF)
            .min(MAX_ERROR_BACKOFF)
    }

    /// Claim from the configured queues in order.
    async fn claim_next(&self) -> AppResult<Option<(Job, String)>> {
        for queue in &self.config.queues {
            let token = Uuid::new_v4().to_string();
            if let Some(job) = self.store.claim(queue, &token, self.lock_duration()).await? {
                return Ok(Some((job, token)));
            }
        }
        Ok(None)
    }

    /// Run one attempt of `job` and record the outcome.
    async fn run_job(self: Arc<Self>, job: Job, token: String, permit: OwnedSemaphorePermit) {
        let _permit = permit;
        let started = Instant::now();
        let attempt = job.attempts_made + 1;

        self.publish(WorkerEvent::Active {
            job_id: job.id.clone(),
            name: job.name,
            attempt,
        });

        let renewal = LeaseRenewal(tokio::spawn(
            Arc::clone(&self).renew_lease(job.id.clone(), token.clone()),
        ));

        let (reporter, progress_task) = ProgressReporter::spawn(
            Arc::clone(&self.store),
            job.id.clone(),
            self.events.clone(),
        );
        let ctx = JobContext::new(job.clone(), Arc::clone(&self.store), reporter);

        // The processor runs in its own task so a panic surfaces as a
        // `JoinError` here instead of unwinding past the lease renewal.
        let execution = tokio::spawn({
            let inner = Arc::clone(&self);
            let timeout = job.options.timeout();
            async move {
                match timeout {
                    Some(limit) => match time::timeout(limit, inner.registry.execute(&ctx)).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(JobExecutionError::Transient(format!(
                            "Job timed out after {}ms",
                            limit.as_millis()
                        ))),
                    },
                    None => inner.registry.execute(&ctx).await,
                }
            }
        });

        let outcome = match execution.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = if e.is_panic() {
                    format!("Processor panicked: {}", panic_message(e.into_panic()))
                } else {
                    "Processor task was cancelled".to_string()
                };
                error!(job_id = %job.id, job_name = %job.name, reason = %reason, "Job attempt aborted");
                Err(JobExecutionError::Transient(reason))
            }
        };

        if time::timeout(PROGRESS_FLUSH_TIMEOUT, progress_task)
            .await
            .is_err()
        {
            warn!(job_id = %job.id, "Timed out flushing job progress");
        }
        drop(renewal);

        match outcome {
            Ok(result) => self.record_success(&job, &token, result, started).await,
            Err(err) => self.record_failure(&job, &token, err, attempt).await,
        }
    }

    async fn record_success(
        &self,
        job: &Job,
        token: &str,
        result: serde_json::Value,
        started: Instant,
    ) {
        match self.store.complete(&job.id, token, result).await {
            Ok(()) => self.publish(WorkerEvent::Completed {
                job_id: job.id.clone(),
                name: job.name,
                duration_ms: started.elapsed().as_millis() as u64,
            }),
            Err(e) => self.report_store_error(&job.id, "complete", e),
        }
    }

    async fn record_failure(&self, job: &Job, token: &str, err: JobExecutionError, attempt: u32) {
        let reason = match &err {
            JobExecutionError::Permanent(msg) | JobExecutionError::Transient(msg) => msg.clone(),
            JobExecutionError::Internal(e) => e.to_string(),
        };
        let retry_after = err
            .is_retryable()
            .then(|| job.options.backoff.delay_for(attempt));

        match self.store.fail(&job.id, token, &reason, retry_after).await {
            Ok(state) => self.publish(WorkerEvent::Failed {
                job_id: job.id.clone(),
                name: job.name,
                reason,
                attempts_made: attempt,
                will_retry: !state.is_terminal(),
            }),
            Err(e) => self.report_store_error(&job.id, "fail", e),
        }
    }

    /// A stale lease means another worker owns the job now; anything else is
    /// a worker-level error and the lease timeout stays authoritative.
    fn report_store_error(&self, job_id: &JobId, operation: &str, e: AppError) {
        if e.kind == ErrorKind::Conflict {
            self.publish(WorkerEvent::LockLost {
                job_id: job_id.clone(),
            });
        } else {
            error!(job_id = %job_id, operation, error = %e, "Failed to record job outcome");
            self.publish(WorkerEvent::Error {
                message: e.to_string(),
            });
        }
    }

    /// Renew the lease until aborted or until it is lost.
    async fn renew_lease(self: Arc<Self>, job_id: JobId, token: String) {
        let period = Duration::from_millis(self.config.lock_renew_interval_ms());
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self
                .store
                .extend_lock(&job_id, &token, self.lock_duration())
                .await
            {
                Ok(true) => trace!(job_id = %job_id, "Lease renewed"),
                Ok(false) => {
                    self.publish(WorkerEvent::LockLost { job_id });
                    break;
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Failed to renew lease, will retry");
                }
            }
        }
    }

    /// Periodically recover jobs whose lease expired.
    async fn stalled_loop(self: Arc<Self>, mut cancel: watch::Receiver<bool>) {
        let period = Duration::from_millis(self.config.stalled_interval_ms.max(1));
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.changed() => break,
                _ = ticker.tick() => self.check_stalled().await,
            }
        }

        debug!(worker_id = %self.worker_id, "Stalled checker stopped");
    }

    async fn check_stalled(&self) {
        for queue in &self.config.queues {
            match self
                .store
                .recover_stalled(queue, self.config.max_stalled_count)
                .await
            {
                Ok(recovered) => {
                    for stalled in recovered {
                        self.publish(WorkerEvent::Stalled {
                            job_id: stalled.job_id,
                            outcome: stalled.outcome,
                        });
                    }
                }
                Err(e) => {
                    warn!(queue = %queue, error = %e, "Stalled job check failed");
                    self.publish(WorkerEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursegen_entity::job::{JobName, JobOptions, JobState};
    use coursegen_queue::MemoryQueueStore;
    use serde_json::json;

    fn config() -> WorkerConfig {
        WorkerConfig {
            concurrency: 2,
            queues: vec!["notifications".to_string()],
            poll_interval_ms: 10,
            lock_duration_ms: 1_000,
            stalled_interval_ms: 50,
            shutdown_timeout_seconds: 5,
            ..WorkerConfig::default()
        }
    }

    fn notification_job(id: &str) -> Job {
        Job::new(
            JobId::from(id),
            JobName::CreateNotification,
            "notifications",
            json!({}),
            JobOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_second_start_conflicts() {
        let pool = WorkerPool::new(
            Arc::new(MemoryQueueStore::new()),
            ProcessorRegistry::new(),
            config(),
        );
        let handle = pool.start().expect("first start");
        let err = pool.start().expect_err("second start");
        assert_eq!(err.kind, ErrorKind::Conflict);

        handle.shutdown().await.expect("shutdown");
        assert!(!pool.is_running());
        pool.start()
            .expect("restart after shutdown")
            .shutdown()
            .await
            .expect("shutdown");
    }

    #[tokio::test]
    async fn test_undrained_shutdown_blocks_restart_until_jobs_return() {
        let store = MemoryQueueStore::new();
        store
            .add_job(notification_job("slow"))
            .await
            .expect("add");

        let mut registry = ProcessorRegistry::new();
        registry
            .register_fn(JobName::CreateNotification, |_ctx| async {
                time::sleep(Duration::from_millis(300)).await;
                Ok::<_, JobExecutionError>(json!({}))
            })
            .expect("register");

        let pool = WorkerPool::new(
            Arc::new(store.clone()),
            registry,
            WorkerConfig {
                shutdown_timeout_seconds: 0,
                ..config()
            },
        );
        let mut events = pool.subscribe();
        let handle = pool.start().expect("start");
        time::timeout(Duration::from_secs(5), async {
            while !matches!(events.recv().await, Ok(WorkerEvent::Active { .. })) {}
        })
        .await
        .expect("job started");

        let err = handle.shutdown().await.expect_err("drain times out");
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(pool.is_running());
        assert_eq!(
            pool.start().expect_err("restart over abandoned job").kind,
            ErrorKind::Conflict
        );

        time::timeout(Duration::from_secs(5), async {
            while pool.is_running() {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("pool released after the job returned");
        let job = store
            .get_job(&JobId::from("slow"))
            .await
            .expect("get")
            .expect("job");
        assert_eq!(job.state, JobState::Completed);
    }

    #[tokio::test]
    async fn test_runs_job_and_publishes_events() {
        let store = MemoryQueueStore::new();
        store
            .add_job(notification_job("n-1"))
            .await
            .expect("add");

        let mut registry = ProcessorRegistry::new();
        registry
            .register_fn(JobName::CreateNotification, |_ctx| async {
                Ok(json!({ "delivered": true }))
            })
            .expect("register");

        let pool = WorkerPool::new(Arc::new(store.clone()), registry, config());
        let mut events = pool.subscribe();
        let handle = pool.start().expect("start");

        let completed = time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(WorkerEvent::Completed { job_id, .. }) = events.recv().await {
                    break job_id;
                }
            }
        })
        .await
        .expect("completed event");
        assert_eq!(completed, JobId::from("n-1"));

        handle.shutdown().await.expect("shutdown");

        let job = store
            .get_job(&JobId::from("n-1"))
            .await
            .expect("get")
            .expect("job");
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.result, Some(json!({ "delivered": true })));
    }

    #[test]
    fn test_error_backoff_is_capped() {
        let pool = WorkerPool::new(
            Arc::new(MemoryQueueStore::new()),
            ProcessorRegistry::new(),
            config(),
        );
        let inner = &pool.inner;
        assert_eq!(inner.error_backoff(1), Duration::from_millis(10));
        assert_eq!(inner.error_backoff(2), Duration::from_millis(20));
        assert_eq!(inner.error_backoff(50), MAX_ERROR_BACKOFF);
    }
}
