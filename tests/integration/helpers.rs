//! Shared test helpers for integration tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use coursegen_core::config::worker::WorkerConfig;
use coursegen_core::error::AppError;
use coursegen_core::result::AppResult;
use coursegen_core::types::{CourseId, JobId, LessonId};
use coursegen_entity::content::{
    ContentGenerator, Difficulty, GeneratedLesson, LessonRequest, LessonSection,
};
use coursegen_entity::course::{
    CourseStore, NewCourse, StandaloneLesson, StoredCourse, StoredLesson,
};
use coursegen_entity::job::{
    Backoff, GenerateLessonPayload, JobOptions, JobState, JobStatus, TriggerSource,
};
use coursegen_queue::MemoryQueueStore;
use coursegen_worker::{JobQueue, ProcessorRegistry, WorkerEvent, WorkerPool};

/// Upper bound for any wait in these tests.
pub const WAIT: Duration = Duration::from_secs(10);

/// Test context: one in-memory queue store plus its producer API.
pub struct TestQueue {
    /// The shared store
    pub store: MemoryQueueStore,
    /// Producer API over the store
    pub queue: JobQueue,
}

impl TestQueue {
    /// Create a queue whose retries back off for 10ms and never time out.
    pub fn new() -> Self {
        let store = MemoryQueueStore::new();
        let defaults = JobOptions {
            backoff: Backoff::fixed(10),
            timeout_ms: None,
            ..JobOptions::default()
        };
        let queue = JobQueue::new(Arc::new(store.clone()), defaults);
        Self { store, queue }
    }

    /// A worker pool over this store with fast timings.
    pub fn pool(&self, registry: ProcessorRegistry, config: WorkerConfig) -> WorkerPool {
        WorkerPool::with_worker_id(Arc::new(self.store.clone()), registry, config, "test-worker")
    }

    /// Poll until `job_id` reaches `state`, then return its status.
    pub async fn wait_for_state(&self, job_id: &JobId, state: JobState) -> JobStatus {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let status = self.queue.get_status(job_id).await.expect("status");
            if status.state == state {
                return status;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {job_id} stuck in {} waiting for {state}",
                status.state
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Worker settings scaled down to milliseconds.
pub fn fast_config(queues: &[&str], concurrency: usize) -> WorkerConfig {
    WorkerConfig {
        concurrency,
        queues: queues.iter().map(|q| q.to_string()).collect(),
        poll_interval_ms: 20,
        lock_duration_ms: 500,
        lock_renew_interval_ms: Some(100),
        stalled_interval_ms: 50,
        max_stalled_count: 1,
        rate_limit: None,
        shutdown_timeout_seconds: 5,
    }
}

/// A valid standalone lesson payload.
pub fn lesson(topic: &str) -> GenerateLessonPayload {
    GenerateLessonPayload {
        user_id: 1,
        topic: topic.to_string(),
        difficulty: Difficulty::Beginner,
        language: "rust".to_string(),
        paradigm: None,
        trigger: TriggerSource::Cli,
    }
}

/// Wait for the first event matching `pred`.
pub async fn next_event<F>(rx: &mut broadcast::Receiver<WorkerEvent>, pred: F) -> WorkerEvent
where
    F: Fn(&WorkerEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("event not seen in time")
}

/// Generator that fails for one topic and titles lessons after their topic.
#[derive(Debug, Default)]
pub struct FlakyGenerator {
    /// Topics that always fail
    pub failing: Vec<String>,
}

#[async_trait]
impl ContentGenerator for FlakyGenerator {
    async fn generate_lesson(&self, request: &LessonRequest) -> AppResult<GeneratedLesson> {
        if self.failing.contains(&request.topic) {
            return Err(AppError::external(format!(
                "engine rejected '{}'",
                request.topic
            )));
        }
        Ok(GeneratedLesson {
            title: request.topic.clone(),
            summary: String::new(),
            sections: vec![LessonSection {
                heading: request.topic.clone(),
                body: "Some words about it".to_string(),
            }],
            tokens_used: 10,
        })
    }
}

/// Course store that remembers lesson titles per course.
#[derive(Debug, Default)]
pub struct RecordingCourseStore {
    courses: Mutex<HashMap<String, (StoredCourse, Vec<String>)>>,
}

impl RecordingCourseStore {
    /// Titles of the lessons stored with the course written under `key`.
    pub fn lesson_titles(&self, key: &str) -> Vec<String> {
        self.courses
            .lock()
            .expect("poisoned")
            .get(key)
            .map(|(_, titles)| titles.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CourseStore for RecordingCourseStore {
    async fn find_course_by_key(&self, idempotency_key: &str) -> AppResult<Option<StoredCourse>> {
        Ok(self
            .courses
            .lock()
            .expect("poisoned")
            .get(idempotency_key)
            .map(|(c, _)| c.clone()))
    }

    async fn slug_exists(&self, slug: &str) -> AppResult<bool> {
        Ok(self
            .courses
            .lock()
            .expect("poisoned")
            .values()
            .any(|(c, _)| c.slug == slug))
    }

    async fn insert_course(&self, course: &NewCourse) -> AppResult<StoredCourse> {
        let mut courses = self.courses.lock().expect("poisoned");
        let entry = courses
            .entry(course.idempotency_key.clone())
            .or_insert_with(|| {
                let stored = StoredCourse {
                    id: CourseId::new(),
                    idempotency_key: course.idempotency_key.clone(),
                    title: course.title.clone(),
                    slug: course.slug.clone(),
                    lesson_count: course.lessons.len() as u32,
                    created_at: Utc::now(),
                };
                let titles = course.lessons.iter().map(|l| l.lesson.title.clone()).collect();
                (stored, titles)
            });
        Ok(entry.0.clone())
    }

    async fn upsert_lesson(&self, lesson: &StandaloneLesson) -> AppResult<StoredLesson> {
        Ok(StoredLesson {
            id: LessonId::new(),
            course_id: None,
            title: lesson.lesson.title.clone(),
            word_count: lesson.word_count,
            created_at: Utc::now(),
        })
    }
}
