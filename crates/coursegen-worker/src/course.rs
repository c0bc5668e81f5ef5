//! Turns a course request into a generation flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coursegen_core::error::AppError;
use coursegen_core::result::AppResult;
use coursegen_core::types::JobId;
use coursegen_entity::content::Difficulty;
use coursegen_entity::course::slugify;
use coursegen_entity::job::{
    EnqueueOptions, FinalizeCoursePayload, FlowHandle, FlowNode, GenerateSingleLessonPayload,
    MAX_COURSE_LESSONS, TriggerSource,
};

use crate::flow::FlowProducer;

/// A parent node plus its children, ready for [`FlowProducer::start_flow`].
#[derive(Debug, Clone)]
pub struct FlowSpec {
    /// Aggregator job.
    pub parent: FlowNode,
    /// Fan-out jobs.
    pub children: Vec<FlowNode>,
}

impl FlowSpec {
    /// Register this flow.
    pub async fn start(self, producer: &FlowProducer) -> AppResult<FlowHandle> {
        producer.start_flow(self.parent, self.children).await
    }
}

/// A request for a multi-lesson course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoursePlan {
    /// Requester and course owner.
    pub user_id: i64,
    /// Course title.
    pub title: String,
    /// Overall topic.
    pub topic: String,
    /// Optional description.
    pub description: Option<String>,
    /// Difficulty.
    pub difficulty: Difficulty,
    /// Programming language of examples.
    pub language: String,
    /// Optional programming paradigm preference.
    pub paradigm: Option<String>,
    /// One topic per lesson, in course order.
    pub lesson_topics: Vec<String>,
    /// What triggered the request.
    pub trigger: TriggerSource,
    /// When the request was made.
    pub requested_at: DateTime<Utc>,
}

impl CoursePlan {
    /// Id of the aggregator job.
    ///
    /// Derived from the requester, title, and request time so that
    /// resubmitting the same request cannot register a second flow. It is
    /// also the idempotency key of the course write.
    pub fn parent_job_id(&self) -> JobId {
        JobId::from(format!(
            "course:{}:{}:{}",
            self.user_id,
            slugify(&self.title),
            self.requested_at.timestamp_millis()
        ))
    }

    /// Build the flow: one `generate-single-lesson` child per lesson topic
    /// with ordinal indexes `0..K-1`, aggregated by `finalize-course`.
    pub fn into_flow(self) -> AppResult<FlowSpec> {
        let count = self.lesson_topics.len();
        if count == 0 {
            return Err(AppError::validation("A course needs at least one lesson"));
        }
        let lesson_count = u32::try_from(count)
            .ok()
            .filter(|n| *n <= MAX_COURSE_LESSONS)
            .ok_or_else(|| {
                AppError::validation(format!(
                    "A course has at most {MAX_COURSE_LESSONS} lessons, got {count}"
                ))
            })?;

        let parent_id = self.parent_job_id();

        let children = self
            .lesson_topics
            .iter()
            .zip(0u32..)
            .map(|(topic, lesson_index)| {
                FlowNode::new(GenerateSingleLessonPayload {
                    user_id: self.user_id,
                    course_title: self.title.clone(),
                    topic: topic.clone(),
                    lesson_index,
                    lesson_count,
                    difficulty: self.difficulty,
                    language: self.language.clone(),
                    paradigm: self.paradigm.clone(),
                })
                .with_options(
                    EnqueueOptions::default()
                        .with_job_id(format!("{parent_id}:lesson-{lesson_index}")),
                )
            })
            .collect();

        let parent = FlowNode::new(FinalizeCoursePayload {
            user_id: self.user_id,
            title: self.title,
            topic: self.topic,
            description: self.description,
            difficulty: self.difficulty,
            language: self.language,
            lesson_count,
            trigger: self.trigger,
        })
        .with_options(EnqueueOptions::default().with_job_id(parent_id));

        Ok(FlowSpec { parent, children })
    }
}
