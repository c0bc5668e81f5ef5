//! `finalize-course`: the aggregator of a course flow.
//!
//! Runs once every child is terminal. Children that exhausted their retries
//! are tolerated: the course is written with the lessons that exist and the
//! missing ordinals are reported in the result. Only a flow with no usable
//! lesson at all fails, and it fails permanently.
//!
//! The course write is keyed by this job's id. A re-run after a lost lease
//! finds the course written by the earlier run and returns it.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use coursegen_core::error::ErrorKind;
use coursegen_entity::course::{CourseStore, NewCourse, NewLesson, StoredCourse, slugify, with_suffix};
use coursegen_entity::job::{
    CourseResult, CreateNotificationPayload, EnqueueOptions, FinalizeCoursePayload,
    GenerationStep, JobName, JobProgress, LessonFragment,
};
use coursegen_entity::notification::NotificationKind;

use crate::executor::{JobContext, JobExecutionError, JobProcessor};
use crate::queue::JobQueue;

/// Collisions tried before giving up on a free slug.
const MAX_SLUG_ATTEMPTS: u32 = 100;

/// Collects lesson fragments and writes the course in one transaction.
#[derive(Debug)]
pub struct FinalizeCourseProcessor {
    courses: Arc<dyn CourseStore>,
    notifications: JobQueue,
}

impl FinalizeCourseProcessor {
    /// Create the processor.
    pub fn new(courses: Arc<dyn CourseStore>, notifications: JobQueue) -> Self {
        Self {
            courses,
            notifications,
        }
    }

    /// First free slug among `base`, `base-2`, `base-3`, ...
    async fn resolve_slug(&self, title: &str) -> Result<String, JobExecutionError> {
        let base = slugify(title);
        if !self.courses.slug_exists(&base).await? {
            return Ok(base);
        }
        for n in 2..=MAX_SLUG_ATTEMPTS {
            let candidate = with_suffix(&base, n);
            if !self.courses.slug_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(JobExecutionError::Transient(format!(
            "No free slug for '{base}' after {MAX_SLUG_ATTEMPTS} attempts"
        )))
    }

    async fn notify_ready(
        &self,
        payload: &FinalizeCoursePayload,
        course: &StoredCourse,
    ) -> Result<(), JobExecutionError> {
        self.notifications
            .enqueue(
                CreateNotificationPayload {
                    user_id: payload.user_id,
                    kind: NotificationKind::CourseReady,
                    title: format!("Course ready: {}", course.title),
                    message: format!(
                        "Your course \"{}\" with {} lessons is ready.",
                        course.title, course.lesson_count
                    ),
                    resource_id: Some(course.id.to_string()),
                    idempotency_key: format!("course-ready:{}", course.id),
                },
                EnqueueOptions::default().with_dedupe_key(course.id.to_string()),
            )
            .await?;
        Ok(())
    }

    async fn notify_failed(&self, ctx: &JobContext, payload: &FinalizeCoursePayload) {
        let result = self
            .notifications
            .enqueue(
                CreateNotificationPayload {
                    user_id: payload.user_id,
                    kind: NotificationKind::GenerationFailed,
                    title: format!("Course generation failed: {}", payload.title),
                    message: "None of the course lessons could be generated.".to_string(),
                    resource_id: None,
                    idempotency_key: format!("course-failed:{}", ctx.job_id()),
                },
                EnqueueOptions::default().with_dedupe_key(ctx.job_id().to_string()),
            )
            .await;
        if let Err(e) = result {
            warn!(job_id = %ctx.job_id(), error = %e, "Failed to enqueue failure notification");
        }
    }
}

#[async_trait]
impl JobProcessor for FinalizeCourseProcessor {
    fn name(&self) -> JobName {
        JobName::FinalizeCourse
    }

    async fn process(&self, ctx: &JobContext) -> Result<Value, JobExecutionError> {
        let payload: FinalizeCoursePayload = ctx.payload()?;
        let idempotency_key = ctx.job_id().to_string();

        ctx.report_progress(JobProgress::new(
            GenerationStep::CollectingResults,
            10,
            "Collecting lesson results",
        ));

        let children = ctx.children_values().await?;
        for (child_id, reason) in &children.failed {
            warn!(
                job_id = %ctx.job_id(),
                child_id = %child_id,
                reason = %reason,
                "Course lesson failed, continuing without it"
            );
        }

        let (mut fragments, undecodable) = children.decode::<LessonFragment>();
        for (child_id, error) in &undecodable {
            warn!(
                job_id = %ctx.job_id(),
                child_id = %child_id,
                error = %error,
                "Skipping unreadable lesson result"
            );
        }

        fragments.retain(|(_, f)| f.lesson_index < payload.lesson_count && !f.lesson.is_empty());
        if fragments.is_empty() {
            self.notify_failed(ctx, &payload).await;
            return Err(JobExecutionError::Permanent(format!(
                "No lessons were generated for course '{}' ({} failed)",
                payload.title,
                children.failed.len()
            )));
        }

        // Arrival order is arbitrary; the lesson index is authoritative.
        fragments.sort_by_key(|(_, f)| f.lesson_index);
        fragments.dedup_by_key(|(_, f)| f.lesson_index);

        let present: BTreeSet<u32> = fragments.iter().map(|(_, f)| f.lesson_index).collect();
        let missing_lessons: Vec<u32> = (0..payload.lesson_count)
            .filter(|i| !present.contains(i))
            .collect();
        let total_words = fragments
            .iter()
            .fold(0u32, |sum, (_, f)| sum.saturating_add(f.word_count));
        let total_tokens = fragments
            .iter()
            .fold(0u32, |sum, (_, f)| sum.saturating_add(f.lesson.tokens_used));

        ctx.report_progress(
            JobProgress::new(
                GenerationStep::Finalizing,
                50,
                format!("Assembling {} lessons", fragments.len()),
            )
            .with_detail(present.len() as u32, payload.lesson_count),
        );

        let (course, reused) = match self.courses.find_course_by_key(&idempotency_key).await? {
            Some(existing) => {
                info!(
                    job_id = %ctx.job_id(),
                    course_id = %existing.id,
                    "Course already written by an earlier attempt"
                );
                (existing, true)
            }
            None => {
                let slug = self.resolve_slug(&payload.title).await?;

                ctx.report_progress(JobProgress::new(
                    GenerationStep::Storing,
                    80,
                    "Storing course",
                ));

                let new_course = NewCourse {
                    idempotency_key,
                    user_id: payload.user_id,
                    title: payload.title.clone(),
                    slug,
                    description: payload.description.clone(),
                    difficulty: payload.difficulty,
                    language: payload.language.clone(),
                    lessons: fragments
                        .into_iter()
                        .zip(0u32..)
                        .map(|((_, f), position)| NewLesson {
                            position,
                            lesson: f.lesson,
                            word_count: f.word_count,
                        })
                        .collect(),
                    total_words,
                    total_tokens,
                };

                match self.courses.insert_course(&new_course).await {
                    Ok(course) => (course, false),
                    Err(e) if e.kind == ErrorKind::Conflict => {
                        return Err(JobExecutionError::Transient(format!(
                            "Slug '{}' was taken concurrently: {}",
                            new_course.slug, e.message
                        )));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        ctx.report_progress(JobProgress::new(
            GenerationStep::Delivering,
            95,
            "Notifying requester",
        ));
        self.notify_ready(&payload, &course).await?;

        ctx.report_progress(JobProgress::new(GenerationStep::Done, 100, "Course ready"));
        info!(
            job_id = %ctx.job_id(),
            course_id = %course.id,
            slug = %course.slug,
            lesson_count = course.lesson_count,
            missing = missing_lessons.len(),
            reused,
            "Course finalized"
        );

        Ok(serde_json::to_value(CourseResult {
            course_id: course.id,
            title: course.title,
            slug: course.slug,
            lesson_count: course.lesson_count,
            missing_lessons,
            total_words,
            total_tokens,
            reused,
        })?)
    }
}
