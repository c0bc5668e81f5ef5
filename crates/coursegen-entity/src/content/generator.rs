//! Interface of the external content generation engine.

use async_trait::async_trait;

use coursegen_core::result::AppResult;

use super::model::{GeneratedLesson, LessonRequest};

/// Opaque generation engine: parameters in, structured lesson out.
///
/// Calls are expensive (minutes) and may fail; failures are surfaced as
/// errors so the worker pool can retry the job.
#[async_trait]
pub trait ContentGenerator: Send + Sync + std::fmt::Debug + 'static {
    /// Generate one lesson.
    async fn generate_lesson(&self, request: &LessonRequest) -> AppResult<GeneratedLesson>;
}
