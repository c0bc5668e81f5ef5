//! Retry and failure semantics of the worker pool.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::json;

use coursegen_entity::job::{Backoff, EnqueueOptions, JobName, JobState};
use coursegen_worker::{JobContext, JobExecutionError, ProcessorRegistry, WorkerEvent};

use crate::helpers::{self, TestQueue};

const QUEUE: &str = "lesson-generation";

/// Registry whose lesson processor fails transiently `failures` times.
fn flaky_registry(failures: u32, calls: Arc<AtomicU32>) -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::new();
    registry
        .register_fn(JobName::GenerateLesson, move |_ctx: JobContext| {
            let calls = Arc::clone(&calls);
            async move {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call <= failures {
                    Err(JobExecutionError::Transient(format!("engine busy ({call})")))
                } else {
                    Ok(json!({ "call": call }))
                }
            }
        })
        .expect("register");
    registry
}

#[tokio::test]
async fn test_succeeds_on_third_attempt() {
    let t = TestQueue::new();
    let calls = Arc::new(AtomicU32::new(0));
    let pool = t.pool(
        flaky_registry(2, Arc::clone(&calls)),
        helpers::fast_config(&[QUEUE], 1),
    );
    let handle = pool.start().expect("start");

    let id = t
        .queue
        .enqueue(helpers::lesson("Loops"), EnqueueOptions::default())
        .await
        .expect("enqueue");

    let status = t.wait_for_state(&id, JobState::Completed).await;
    assert_eq!(status.attempts_made, 3);
    assert_eq!(status.result, Some(json!({ "call": 3 })));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_exhausted_attempts_fail_terminally() {
    let t = TestQueue::new();
    let calls = Arc::new(AtomicU32::new(0));
    let pool = t.pool(
        flaky_registry(u32::MAX, Arc::clone(&calls)),
        helpers::fast_config(&[QUEUE], 1),
    );
    let mut events = pool.subscribe();
    let handle = pool.start().expect("start");

    let id = t
        .queue
        .enqueue(helpers::lesson("Loops"), EnqueueOptions::default())
        .await
        .expect("enqueue");

    let status = t.wait_for_state(&id, JobState::Failed).await;
    assert_eq!(status.attempts_made, 3);
    assert_eq!(status.max_attempts, 3);
    assert!(status.error.as_deref().is_some_and(|e| e.contains("engine busy (3)")));

    let last = helpers::next_event(&mut events, |e| {
        matches!(e, WorkerEvent::Failed { will_retry: false, .. })
    })
    .await;
    assert!(matches!(last, WorkerEvent::Failed { attempts_made: 3, .. }));

    handle.shutdown().await.expect("shutdown");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_permanent_error_skips_retries() {
    let t = TestQueue::new();
    let mut registry = ProcessorRegistry::new();
    registry
        .register_fn(JobName::GenerateLesson, |_ctx: JobContext| async {
            Err::<serde_json::Value, _>(JobExecutionError::Permanent(
                "topic is not teachable".to_string(),
            ))
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

    let status = t.wait_for_state(&id, JobState::Failed).await;
    assert_eq!(status.attempts_made, 1);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_timeout_counts_as_failed_attempt() {
    let t = TestQueue::new();
    let mut registry = ProcessorRegistry::new();
    registry
        .register_fn(JobName::GenerateLesson, |_ctx: JobContext| async {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok::<_, JobExecutionError>(json!({}))
        })
        .expect("register");
    let handle = t
        .pool(registry, helpers::fast_config(&[QUEUE], 1))
        .start()
        .expect("start");

    let id = t
        .queue
        .enqueue(
            helpers::lesson("Loops"),
            EnqueueOptions::default()
                .with_timeout_ms(50)
                .with_attempts(2),
        )
        .await
        .expect("enqueue");

    let status = t.wait_for_state(&id, JobState::Failed).await;
    assert_eq!(status.attempts_made, 2);
    assert!(status.error.as_deref().is_some_and(|e| e.contains("timed out")));

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_panicking_processor_is_retried_then_failed() {
    let t = TestQueue::new();
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = ProcessorRegistry::new();
    let seen = Arc::clone(&calls);
    registry
        .register_fn(JobName::GenerateLesson, move |ctx: JobContext| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                if ctx.attempt() > 0 {
                    panic!("processor bug on attempt {}", ctx.attempt());
                }
                Ok::<_, JobExecutionError>(json!({}))
            }
        })
        .expect("register");
    let pool = t.pool(registry, helpers::fast_config(&[QUEUE], 1));
    let handle = pool.start().expect("start");

    let id = t
        .queue
        .enqueue(
            helpers::lesson("Loops"),
            EnqueueOptions::default().with_attempts(2),
        )
        .await
        .expect("enqueue");

    let status = t.wait_for_state(&id, JobState::Failed).await;
    assert_eq!(status.attempts_made, 2);
    assert!(
        status
            .error
            .as_deref()
            .is_some_and(|e| e.contains("panicked") && e.contains("processor bug on attempt 2"))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_exponential_backoff_spacing_grows() {
    let t = TestQueue::new();
    let started = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ProcessorRegistry::new();
    let seen = Arc::clone(&started);
    registry
        .register_fn(JobName::GenerateLesson, move |_ctx: JobContext| {
            seen.lock().expect("poisoned").push(tokio::time::Instant::now());
            async {
                Err::<serde_json::Value, _>(JobExecutionError::Transient("engine busy".into()))
            }
        })
        .expect("register");
    let handle = t
        .pool(registry, helpers::fast_config(&[QUEUE], 1))
        .start()
        .expect("start");

    let id = t
        .queue
        .enqueue(
            helpers::lesson("Loops"),
            EnqueueOptions::default().with_backoff(Backoff::exponential(60)),
        )
        .await
        .expect("enqueue");

    let status = t.wait_for_state(&id, JobState::Failed).await;
    assert_eq!(status.attempts_made, 3);
    handle.shutdown().await.expect("shutdown");

    let started = started.lock().expect("poisoned").clone();
    assert_eq!(started.len(), 3);
    let first_gap = started[1] - started[0];
    let second_gap = started[2] - started[1];
    assert!(first_gap >= std::time::Duration::from_millis(60), "{first_gap:?}");
    assert!(second_gap >= std::time::Duration::from_millis(120), "{second_gap:?}");
    assert!(second_gap > first_gap, "{first_gap:?} then {second_gap:?}");
}
