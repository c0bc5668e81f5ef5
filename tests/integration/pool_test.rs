//! Worker pool behavior: dedupe, leases, concurrency, shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde_json::json;

use coursegen_core::config::worker::RateLimitConfig;
use coursegen_entity::job::{EnqueueOptions, GenerationStep, JobName, JobProgress, JobState};
use coursegen_queue::{QueueStore, STALLED_REASON, StalledOutcome};
use coursegen_worker::{JobContext, JobExecutionError, ProcessorRegistry, WorkerEvent};

use crate::helpers::{self, TestQueue};

const QUEUE: &str = "lesson-generation";

fn sleeping_registry(delay: Duration, in_flight: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::new();
    registry
        .register_fn(JobName::GenerateLesson, move |_ctx: JobContext| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, JobExecutionError>(json!({ "ok": true }))
            }
        })
        .expect("register");
    registry
}

fn ok_registry() -> ProcessorRegistry {
    sleeping_registry(
        Duration::ZERO,
        Arc::new(AtomicUsize::new(0)),
        Arc::new(AtomicUsize::new(0)),
    )
}

#[tokio::test]
async fn test_dedupe_key_returns_existing_job() {
    let t = TestQueue::new();
    let options = EnqueueOptions::default().with_dedupe_key("user-1:loops");

    let first = t
        .queue
        .enqueue(helpers::lesson("Loops"), options.clone())
        .await
        .expect("first");
    let second = t
        .queue
        .enqueue(helpers::lesson("Loops"), options)
        .await
        .expect("second");

    assert_eq!(first, second);
    let metrics = t.queue.get_metrics(QUEUE).await.expect("metrics");
    assert_eq!(metrics.waiting, 1);
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let t = TestQueue::new();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let handle = t
        .pool(
            sleeping_registry(Duration::from_millis(50), in_flight, Arc::clone(&peak)),
            helpers::fast_config(&[QUEUE], 2),
        )
        .start()
        .expect("start");

    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(
            t.queue
                .enqueue(helpers::lesson(&format!("Topic {i}")), EnqueueOptions::default())
                .await
                .expect("enqueue"),
        );
    }
    for id in &ids {
        t.wait_for_state(id, JobState::Completed).await;
    }

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_rate_limit_spaces_job_starts() {
    let t = TestQueue::new();
    let mut config = helpers::fast_config(&[QUEUE], 4);
    config.rate_limit = Some(RateLimitConfig {
        max: 2,
        duration_ms: 300,
    });
    let handle = t.pool(ok_registry(), config).start().expect("start");

    let started = Instant::now();
    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(
            t.queue
                .enqueue(helpers::lesson(&format!("Topic {i}")), EnqueueOptions::default())
                .await
                .expect("enqueue"),
        );
    }
    for id in &ids {
        t.wait_for_state(id, JobState::Completed).await;
    }

    assert!(started.elapsed() >= Duration::from_millis(300));
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_expired_lease_is_recovered() {
    let t = TestQueue::new();
    let id = t
        .queue
        .enqueue(helpers::lesson("Loops"), EnqueueOptions::default())
        .await
        .expect("enqueue");

    // A worker that claimed the job and died.
    let ghost = t
        .store
        .claim(QUEUE, "ghost", Duration::from_millis(30))
        .await
        .expect("claim")
        .expect("job");
    assert_eq!(ghost.id, id);

    let pool = t.pool(ok_registry(), helpers::fast_config(&[QUEUE], 1));
    let mut events = pool.subscribe();
    let handle = pool.start().expect("start");

    let stalled = helpers::next_event(&mut events, |e| matches!(e, WorkerEvent::Stalled { .. })).await;
    assert_eq!(
        stalled,
        WorkerEvent::Stalled {
            job_id: id.clone(),
            outcome: StalledOutcome::Requeued,
        }
    );

    let status = t.wait_for_state(&id, JobState::Completed).await;
    assert_eq!(status.attempts_made, 1);

    // The dead worker's token no longer completes anything.
    assert!(t.store.complete(&id, "ghost", json!({})).await.is_err());

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_stalling_past_limit_fails_job() {
    let t = TestQueue::new();
    let id = t
        .queue
        .enqueue(helpers::lesson("Loops"), EnqueueOptions::default())
        .await
        .expect("enqueue");
    t.store
        .claim(QUEUE, "ghost", Duration::from_millis(30))
        .await
        .expect("claim")
        .expect("job");

    let mut config = helpers::fast_config(&[QUEUE], 1);
    config.max_stalled_count = 0;
    let handle = t.pool(ok_registry(), config).start().expect("start");

    let status = t.wait_for_state(&id, JobState::Failed).await;
    assert_eq!(status.error.as_deref(), Some(STALLED_REASON));

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_long_job_keeps_its_lease() {
    let t = TestQueue::new();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let pool = t.pool(
        sleeping_registry(Duration::from_millis(1_200), in_flight, peak),
        helpers::fast_config(&[QUEUE], 1),
    );
    let mut events = pool.subscribe();
    let handle = pool.start().expect("start");

    let id = t
        .queue
        .enqueue(helpers::lesson("Loops"), EnqueueOptions::default())
        .await
        .expect("enqueue");

    let status = t.wait_for_state(&id, JobState::Completed).await;
    assert_eq!(status.attempts_made, 1);
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, WorkerEvent::Stalled { .. } | WorkerEvent::LockLost { .. }),
            "unexpected {event:?}"
        );
    }

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_progress_is_visible_after_completion() {
    let t = TestQueue::new();
    let mut registry = ProcessorRegistry::new();
    registry
        .register_fn(JobName::GenerateLesson, |ctx: JobContext| async move {
            ctx.report_progress(JobProgress::new(GenerationStep::GeneratingOutline, 20, "outline"));
            ctx.report_progress(JobProgress::new(GenerationStep::Done, 100, "done"));
            Ok::<_, JobExecutionError>(json!({}))
        })
        .expect("register");
    let handle = t
        .pool(registry, helpers::fast_config(&[QUEUE], 1))
        .start()
        .expect("start");

    let id = t
        .queue
        .enqueue(helpers::lesson("Loops"), EnqueueOptions::default())
        .await
        .expect("enqueue");

    let status = t.wait_for_state(&id, JobState::Completed).await;
    let progress = status.progress.expect("progress");
    assert_eq!(progress.percentage, 100);
    assert_eq!(progress.step, GenerationStep::Done);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_job() {
    let t = TestQueue::new();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let pool = t.pool(
        sleeping_registry(Duration::from_millis(200), in_flight, peak),
        helpers::fast_config(&[QUEUE], 1),
    );
    let mut events = pool.subscribe();
    let handle = pool.start().expect("start");

    let id = t
        .queue
        .enqueue(helpers::lesson("Loops"), EnqueueOptions::default())
        .await
        .expect("enqueue");
    helpers::next_event(&mut events, |e| matches!(e, WorkerEvent::Active { .. })).await;

    handle.shutdown().await.expect("drained");
    assert!(!pool.is_running());

    let status = t.queue.get_status(&id).await.expect("status");
    assert_eq!(status.state, JobState::Completed);

    // Nothing is claimed after shutdown.
    let later = t
        .queue
        .enqueue(helpers::lesson("Later"), EnqueueOptions::default())
        .await
        .expect("enqueue");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = t.queue.get_status(&later).await.expect("status");
    assert_eq!(status.state, JobState::Waiting);
}
