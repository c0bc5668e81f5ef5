//! Course persistence interface consumed by the job processors.

use async_trait::async_trait;

use coursegen_core::result::AppResult;

use super::model::{NewCourse, StandaloneLesson, StoredCourse, StoredLesson};

/// Narrow interface of the persistent datastore.
///
/// Every write is keyed by an idempotency key so that processors can be
/// re-invoked from scratch after a lost lease without duplicating records.
#[async_trait]
pub trait CourseStore: Send + Sync + std::fmt::Debug + 'static {
    /// Find a course previously written under `idempotency_key`.
    async fn find_course_by_key(&self, idempotency_key: &str) -> AppResult<Option<StoredCourse>>;

    /// Check whether a course with this slug exists.
    async fn slug_exists(&self, slug: &str) -> AppResult<bool>;

    /// Write a course and its lessons as one transaction.
    ///
    /// If a course already exists under the same idempotency key it is
    /// returned unchanged. A slug taken concurrently yields a `Conflict`.
    async fn insert_course(&self, course: &NewCourse) -> AppResult<StoredCourse>;

    /// Insert or return the standalone lesson stored under its key.
    async fn upsert_lesson(&self, lesson: &StandaloneLesson) -> AppResult<StoredLesson>;
}
