//! `generate-lesson`: generate one standalone lesson and store it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use coursegen_entity::content::{ContentGenerator, LessonRequest};
use coursegen_entity::course::{CourseStore, StandaloneLesson};
use coursegen_entity::job::{
    CreateNotificationPayload, EnqueueOptions, GenerateLessonPayload, GenerationStep, JobName,
    JobProgress, LessonResult,
};
use coursegen_entity::notification::NotificationKind;

use crate::executor::{JobContext, JobExecutionError, JobProcessor};
use crate::queue::JobQueue;

/// Generates a lesson with one engine call and upserts it keyed by the job id.
#[derive(Debug)]
pub struct GenerateLessonProcessor {
    generator: Arc<dyn ContentGenerator>,
    courses: Arc<dyn CourseStore>,
    notifications: JobQueue,
}

impl GenerateLessonProcessor {
    /// Create the processor.
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        courses: Arc<dyn CourseStore>,
        notifications: JobQueue,
    ) -> Self {
        Self {
            generator,
            courses,
            notifications,
        }
    }
}

#[async_trait]
impl JobProcessor for GenerateLessonProcessor {
    fn name(&self) -> JobName {
        JobName::GenerateLesson
    }

    async fn process(&self, ctx: &JobContext) -> Result<Value, JobExecutionError> {
        let payload: GenerateLessonPayload = ctx.payload()?;

        ctx.report_progress(JobProgress::new(
            GenerationStep::Initializing,
            5,
            format!("Preparing lesson on '{}'", payload.topic),
        ));

        let request = LessonRequest {
            user_id: payload.user_id,
            topic: payload.topic.clone(),
            difficulty: payload.difficulty,
            language: payload.language.clone(),
            paradigm: payload.paradigm.clone(),
            course: None,
        };

        ctx.report_progress(JobProgress::new(
            GenerationStep::GeneratingOutline,
            15,
            "Generating lesson outline",
        ));
        let lesson = self.generator.generate_lesson(&request).await?;
        if lesson.is_empty() {
            return Err(JobExecutionError::Transient(format!(
                "Generation engine returned an empty lesson for '{}'",
                payload.topic
            )));
        }

        ctx.report_progress(JobProgress::new(
            GenerationStep::GeneratingSections,
            60,
            format!("Generated {} sections", lesson.sections.len()),
        ));

        ctx.report_progress(JobProgress::new(
            GenerationStep::Finalizing,
            80,
            "Finalizing lesson",
        ));
        let word_count = lesson.word_count();
        let tokens_used = lesson.tokens_used;
        let title = lesson.title.clone();

        ctx.report_progress(JobProgress::new(
            GenerationStep::Storing,
            90,
            "Storing lesson",
        ));
        let stored = self
            .courses
            .upsert_lesson(&StandaloneLesson {
                idempotency_key: ctx.job_id().to_string(),
                user_id: payload.user_id,
                topic: payload.topic.clone(),
                difficulty: payload.difficulty,
                language: payload.language.clone(),
                lesson,
                word_count,
            })
            .await?;

        let notify = self
            .notifications
            .enqueue(
                CreateNotificationPayload {
                    user_id: payload.user_id,
                    kind: NotificationKind::LessonReady,
                    title: "Your lesson is ready".to_string(),
                    message: format!("\"{title}\" has been generated."),
                    resource_id: Some(stored.id.to_string()),
                    idempotency_key: format!("lesson-ready:{}", stored.id),
                },
                EnqueueOptions::default().with_dedupe_key(stored.id.to_string()),
            )
            .await;
        if let Err(e) = notify {
            warn!(job_id = %ctx.job_id(), error = %e, "Failed to enqueue lesson notification");
        }

        ctx.report_progress(JobProgress::new(GenerationStep::Done, 100, "Lesson ready"));
        info!(
            job_id = %ctx.job_id(),
            lesson_id = %stored.id,
            word_count,
            tokens_used,
            "Lesson generated"
        );

        Ok(serde_json::to_value(LessonResult {
            lesson_id: stored.id,
            title,
            word_count,
            tokens_used,
        })?)
    }
}
