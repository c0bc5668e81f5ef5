//! Course flows end to end: fan-out, partial failure, aggregation.

use std::sync::Arc;

use chrono::Utc;

use coursegen_entity::content::Difficulty;
use coursegen_entity::job::{CourseResult, JobState, TriggerSource};
use coursegen_worker::jobs::{FinalizeCourseProcessor, GenerateSingleLessonProcessor};
use coursegen_worker::{CoursePlan, FlowProducer, ProcessorRegistry};

use crate::helpers::{self, FlakyGenerator, RecordingCourseStore, TestQueue};

const QUEUE: &str = "course-generation";

fn plan(topics: &[&str]) -> CoursePlan {
    CoursePlan {
        user_id: 42,
        title: "Rust Basics".to_string(),
        topic: "Rust".to_string(),
        description: None,
        difficulty: Difficulty::Beginner,
        language: "rust".to_string(),
        paradigm: None,
        lesson_topics: topics.iter().map(|t| t.to_string()).collect(),
        trigger: TriggerSource::Chat,
        requested_at: Utc::now(),
    }
}

fn registry(t: &TestQueue, failing: &[&str], courses: Arc<RecordingCourseStore>) -> ProcessorRegistry {
    let generator = Arc::new(FlakyGenerator {
        failing: failing.iter().map(|t| t.to_string()).collect(),
    });
    let mut registry = ProcessorRegistry::new();
    registry
        .register(Arc::new(GenerateSingleLessonProcessor::new(generator)))
        .expect("register lesson");
    registry
        .register(Arc::new(FinalizeCourseProcessor::new(courses, t.queue.clone())))
        .expect("register finalize");
    registry
}

#[tokio::test]
async fn test_course_survives_failed_lesson() {
    let t = TestQueue::new();
    let courses = Arc::new(RecordingCourseStore::default());

    let handle = FlowProducer::new(t.queue.clone());
    let flow = plan(&["Part 0", "Part 1", "Part 2", "Part 3"])
        .into_flow()
        .expect("flow")
        .start(&handle)
        .await
        .expect("start flow");
    assert_eq!(flow.child_count, 4);

    let parent = t.queue.get_status(&flow.parent_job_id).await.expect("parent");
    assert_eq!(parent.state, JobState::WaitingChildren);

    let pool = t.pool(
        registry(&t, &["Part 2"], Arc::clone(&courses)),
        helpers::fast_config(&[QUEUE], 3),
    );
    let worker = pool.start().expect("start");

    let status = t
        .wait_for_state(&flow.parent_job_id, JobState::Completed)
        .await;
    let result: CourseResult =
        serde_json::from_value(status.result.expect("result")).expect("course result");
    assert_eq!(result.lesson_count, 3);
    assert_eq!(result.missing_lessons, vec![2]);
    assert_eq!(result.slug, "rust-basics");
    assert_eq!(
        courses.lesson_titles(flow.parent_job_id.as_str()),
        vec!["Part 0", "Part 1", "Part 3"]
    );

    let failed_child = t
        .queue
        .get_status(&flow.child_job_ids[2])
        .await
        .expect("child");
    assert_eq!(failed_child.state, JobState::Failed);
    assert_eq!(failed_child.attempts_made, 3);

    let notifications = t.queue.get_metrics("notifications").await.expect("metrics");
    assert_eq!(notifications.waiting, 1);

    worker.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_course_with_no_lessons_fails() {
    let t = TestQueue::new();
    let courses = Arc::new(RecordingCourseStore::default());

    let flow = plan(&["Only"])
        .into_flow()
        .expect("flow")
        .start(&FlowProducer::new(t.queue.clone()))
        .await
        .expect("start flow");

    let worker = t
        .pool(
            registry(&t, &["Only"], Arc::clone(&courses)),
            helpers::fast_config(&[QUEUE], 2),
        )
        .start()
        .expect("start");

    let status = t.wait_for_state(&flow.parent_job_id, JobState::Failed).await;
    assert_eq!(status.attempts_made, 1);
    assert!(courses.lesson_titles(flow.parent_job_id.as_str()).is_empty());

    worker.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_resubmitted_course_is_rejected() {
    let t = TestQueue::new();
    let producer = FlowProducer::new(t.queue.clone());
    let request = plan(&["Ownership", "Borrowing"]);

    request
        .clone()
        .into_flow()
        .expect("flow")
        .start(&producer)
        .await
        .expect("first submission");
    let err = request
        .into_flow()
        .expect("flow")
        .start(&producer)
        .await
        .expect_err("same request twice");
    assert_eq!(err.kind, coursegen_core::error::ErrorKind::Conflict);

    let metrics = t.queue.get_metrics(QUEUE).await.expect("metrics");
    assert_eq!(metrics.waiting, 2);
    assert_eq!(metrics.waiting_children, 1);
}
