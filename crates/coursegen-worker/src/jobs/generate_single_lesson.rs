//! `generate-single-lesson`: one child of a course flow.
//!
//! Children never write to the persistent store. The generated lesson and
//! its ordinal index are returned as the job result and reassembled by
//! `finalize-course`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use coursegen_entity::content::{ContentGenerator, CourseContext, LessonRequest};
use coursegen_entity::job::{
    GenerateSingleLessonPayload, GenerationStep, JobName, JobProgress, LessonFragment,
};

use crate::executor::{JobContext, JobExecutionError, JobProcessor};

/// Generates one lesson of a course and returns it as a fragment.
#[derive(Debug)]
pub struct GenerateSingleLessonProcessor {
    generator: Arc<dyn ContentGenerator>,
}

impl GenerateSingleLessonProcessor {
    /// Create the processor.
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl JobProcessor for GenerateSingleLessonProcessor {
    fn name(&self) -> JobName {
        JobName::GenerateSingleLesson
    }

    async fn process(&self, ctx: &JobContext) -> Result<Value, JobExecutionError> {
        let payload: GenerateSingleLessonPayload = ctx.payload()?;
        let position = payload.lesson_index + 1;

        ctx.report_progress(
            JobProgress::new(
                GenerationStep::GeneratingSections,
                10,
                format!("Generating lesson {position} of {}", payload.lesson_count),
            )
            .with_detail(position, payload.lesson_count),
        );

        let request = LessonRequest {
            user_id: payload.user_id,
            topic: payload.topic.clone(),
            difficulty: payload.difficulty,
            language: payload.language.clone(),
            paradigm: payload.paradigm.clone(),
            course: Some(CourseContext {
                course_title: payload.course_title.clone(),
                lesson_index: payload.lesson_index,
                lesson_count: payload.lesson_count,
            }),
        };

        let lesson = self.generator.generate_lesson(&request).await?;
        if lesson.is_empty() {
            return Err(JobExecutionError::Transient(format!(
                "Generation engine returned an empty lesson for index {}",
                payload.lesson_index
            )));
        }

        let word_count = lesson.word_count();
        debug!(
            job_id = %ctx.job_id(),
            parent = ?ctx.job().parent.as_ref().map(|p| p.id.to_string()),
            lesson_index = payload.lesson_index,
            word_count,
            "Course lesson generated"
        );

        ctx.report_progress(
            JobProgress::new(
                GenerationStep::Done,
                100,
                format!("Lesson {position} of {} ready", payload.lesson_count),
            )
            .with_detail(position, payload.lesson_count),
        );

        Ok(serde_json::to_value(LessonFragment {
            lesson_index: payload.lesson_index,
            lesson,
            word_count,
        })?)
    }
}
