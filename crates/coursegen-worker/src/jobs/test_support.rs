//! In-memory collaborators shared by the processor tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use coursegen_core::error::AppError;
use coursegen_core::result::AppResult;
use coursegen_core::types::{CourseId, JobId, LessonId, NotificationId};
use coursegen_entity::content::{ContentGenerator, GeneratedLesson, LessonRequest, LessonSection};
use coursegen_entity::course::{
    CourseStore, NewCourse, StandaloneLesson, StoredCourse, StoredLesson,
};
use coursegen_entity::job::{Job, JobName, JobOptions};
use coursegen_entity::notification::{DeliveredNotification, NewNotification, NotificationSink};
use coursegen_queue::MemoryQueueStore;

use crate::executor::{JobContext, ProgressReporter};
use crate::queue::JobQueue;

#[derive(Debug, Default)]
struct CourseState {
    courses: HashMap<String, StoredCourse>,
    course_lessons: HashMap<CourseId, Vec<String>>,
    slugs: Vec<String>,
    lessons: HashMap<String, StoredLesson>,
}

/// Course store with the same idempotency rules as the database.
#[derive(Debug, Default)]
pub(crate) struct MemoryCourseStore {
    state: Mutex<CourseState>,
}

impl MemoryCourseStore {
    pub(crate) fn reserve_slug(&self, slug: &str) {
        self.lock().slugs.push(slug.to_string());
    }

    pub(crate) fn course_count(&self) -> usize {
        self.lock().courses.len()
    }

    pub(crate) fn lesson_count(&self) -> usize {
        self.lock().lessons.len()
    }

    pub(crate) fn lesson_titles(&self, course_id: &CourseId) -> Vec<String> {
        self.lock()
            .course_lessons
            .get(course_id)
            .cloned()
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CourseState> {
        self.state.lock().expect("course store poisoned")
    }
}

#[async_trait]
impl CourseStore for MemoryCourseStore {
    async fn find_course_by_key(&self, idempotency_key: &str) -> AppResult<Option<StoredCourse>> {
        Ok(self.lock().courses.get(idempotency_key).cloned())
    }

    async fn slug_exists(&self, slug: &str) -> AppResult<bool> {
        Ok(self.lock().slugs.iter().any(|s| s == slug))
    }

    async fn insert_course(&self, course: &NewCourse) -> AppResult<StoredCourse> {
        let mut state = self.lock();
        if let Some(existing) = state.courses.get(&course.idempotency_key) {
            return Ok(existing.clone());
        }
        if state.slugs.contains(&course.slug) {
            return Err(AppError::conflict(format!("Slug {} is taken", course.slug)));
        }

        let stored = StoredCourse {
            id: CourseId::new(),
            idempotency_key: course.idempotency_key.clone(),
            title: course.title.clone(),
            slug: course.slug.clone(),
            lesson_count: course.lessons.len() as u32,
            created_at: Utc::now(),
        };
        let mut ordered = course.lessons.clone();
        ordered.sort_by_key(|l| l.position);
        state.course_lessons.insert(
            stored.id,
            ordered.into_iter().map(|l| l.lesson.title).collect(),
        );
        state.slugs.push(course.slug.clone());
        state
            .courses
            .insert(course.idempotency_key.clone(), stored.clone());
        Ok(stored)
    }

    async fn upsert_lesson(&self, lesson: &StandaloneLesson) -> AppResult<StoredLesson> {
        let mut state = self.lock();
        let stored = state
            .lessons
            .entry(lesson.idempotency_key.clone())
            .or_insert_with(|| StoredLesson {
                id: LessonId::new(),
                course_id: None,
                title: lesson.lesson.title.clone(),
                word_count: lesson.word_count,
                created_at: Utc::now(),
            });
        Ok(stored.clone())
    }
}

/// Generator that titles each lesson after its topic.
#[derive(Debug, Default)]
pub(crate) struct StubGenerator {
    fail_on: Option<String>,
}

impl StubGenerator {
    pub(crate) fn failing_on(topic: &str) -> Self {
        Self {
            fail_on: Some(topic.to_string()),
        }
    }
}

#[async_trait]
impl ContentGenerator for StubGenerator {
    async fn generate_lesson(&self, request: &LessonRequest) -> AppResult<GeneratedLesson> {
        if self.fail_on.as_deref() == Some(request.topic.as_str()) {
            return Err(AppError::external("engine unavailable"));
        }
        Ok(GeneratedLesson {
            title: request.topic.clone(),
            summary: format!("An introduction to {}", request.topic),
            sections: vec![LessonSection {
                heading: "Overview".to_string(),
                body: format!("{} in {}", request.topic, request.language),
            }],
            tokens_used: 100,
        })
    }
}

/// Sink that records deliveries and collapses repeated keys.
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    delivered: Mutex<Vec<DeliveredNotification>>,
}

impl RecordingSink {
    pub(crate) fn delivered(&self) -> Vec<DeliveredNotification> {
        self.delivered.lock().expect("sink poisoned").clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, notification: &NewNotification) -> AppResult<DeliveredNotification> {
        let mut delivered = self.delivered.lock().expect("sink poisoned");
        if let Some(existing) = delivered
            .iter()
            .find(|d| d.idempotency_key == notification.idempotency_key)
        {
            return Ok(existing.clone());
        }
        let record = DeliveredNotification {
            id: NotificationId::new(),
            user_id: notification.user_id,
            kind: notification.kind,
            idempotency_key: notification.idempotency_key.clone(),
            created_at: Utc::now(),
        };
        delivered.push(record.clone());
        Ok(record)
    }
}

/// Context for a job that was never enqueued.
pub(crate) fn context(name: JobName, id: &str, payload: Value) -> JobContext {
    let job = Job::new(
        JobId::from(id),
        name,
        name.default_queue().as_str(),
        payload,
        JobOptions::default(),
    );
    JobContext::new(
        job,
        Arc::new(MemoryQueueStore::new()),
        ProgressReporter::noop(),
    )
}

/// Queue that notification jobs are enqueued on.
pub(crate) fn notification_queue() -> JobQueue {
    JobQueue::new(Arc::new(MemoryQueueStore::new()), JobOptions::default())
}

pub(crate) fn lesson_payload(topic: &str) -> Value {
    json!({
        "user_id": 1,
        "topic": topic,
        "difficulty": "beginner",
        "language": "rust",
        "trigger": "cli"
    })
}

pub(crate) fn child_payload(topic: &str, index: u32, count: u32) -> Value {
    json!({
        "user_id": 1,
        "course_title": "Rust Basics",
        "topic": topic,
        "lesson_index": index,
        "lesson_count": count,
        "difficulty": "beginner",
        "language": "rust"
    })
}

pub(crate) fn finalize_payload(title: &str, lesson_count: u32) -> Value {
    json!({
        "user_id": 1,
        "title": title,
        "topic": "Rust",
        "language": "rust",
        "lesson_count": lesson_count
    })
}
