//! Course and lesson repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};

use coursegen_core::error::{AppError, ErrorKind};
use coursegen_core::result::AppResult;
use coursegen_core::types::{CourseId, LessonId};
use coursegen_entity::course::{
    CourseStore, NewCourse, StandaloneLesson, StoredCourse, StoredLesson,
};

const SLUG_CONSTRAINT: &str = "courses_slug_key";

#[derive(Debug, sqlx::FromRow)]
struct CourseRow {
    id: CourseId,
    idempotency_key: String,
    title: String,
    slug: String,
    lesson_count: i32,
    created_at: DateTime<Utc>,
}

impl From<CourseRow> for StoredCourse {
    fn from(row: CourseRow) -> Self {
        Self {
            id: row.id,
            idempotency_key: row.idempotency_key,
            title: row.title,
            slug: row.slug,
            lesson_count: to_u32(row.lesson_count),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LessonRow {
    id: LessonId,
    course_id: Option<CourseId>,
    title: String,
    word_count: i32,
    created_at: DateTime<Utc>,
}

impl From<LessonRow> for StoredLesson {
    fn from(row: LessonRow) -> Self {
        Self {
            id: row.id,
            course_id: row.course_id,
            title: row.title,
            word_count: to_u32(row.word_count),
            created_at: row.created_at,
        }
    }
}

/// PostgreSQL implementation of [`CourseStore`].
#[derive(Debug, Clone)]
pub struct PgCourseStore {
    pool: PgPool,
}

impl PgCourseStore {
    /// Create a new course store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_lesson_by_key(&self, idempotency_key: &str) -> AppResult<Option<StoredLesson>> {
        sqlx::query_as::<_, LessonRow>(
            "SELECT id, course_id, title, word_count, created_at FROM lessons \
             WHERE idempotency_key = $1",
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map(|row| row.map(StoredLesson::from))
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find lesson", e))
    }

    async fn insert_lessons(
        tx: &mut Transaction<'_, Postgres>,
        course_id: CourseId,
        course: &NewCourse,
    ) -> AppResult<()> {
        for lesson in &course.lessons {
            sqlx::query(
                "INSERT INTO lessons (id, course_id, position, user_id, topic, title, summary, \
                 content, difficulty, language, word_count, tokens_used) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            )
            .bind(LessonId::new())
            .bind(course_id)
            .bind(to_i32(lesson.position))
            .bind(course.user_id)
            .bind(&lesson.lesson.title)
            .bind(&lesson.lesson.title)
            .bind(&lesson.lesson.summary)
            .bind(Json(&lesson.lesson.sections))
            .bind(course.difficulty.as_str())
            .bind(&course.language)
            .bind(to_i32(lesson.word_count))
            .bind(to_i32(lesson.lesson.tokens_used))
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to insert course lesson", e)
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl CourseStore for PgCourseStore {
    async fn find_course_by_key(&self, idempotency_key: &str) -> AppResult<Option<StoredCourse>> {
        sqlx::query_as::<_, CourseRow>(
            "SELECT id, idempotency_key, title, slug, lesson_count, created_at FROM courses \
             WHERE idempotency_key = $1",
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map(|row| row.map(StoredCourse::from))
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find course", e))
    }

    async fn slug_exists(&self, slug: &str) -> AppResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM courses WHERE slug = $1)")
            .bind(slug)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to check slug", e))
    }

    async fn insert_course(&self, course: &NewCourse) -> AppResult<StoredCourse> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to begin transaction", e)
        })?;

        let inserted = sqlx::query_as::<_, CourseRow>(
            "INSERT INTO courses (id, idempotency_key, user_id, title, slug, description, \
             difficulty, language, lesson_count, total_words, total_tokens) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (idempotency_key) DO NOTHING \
             RETURNING id, idempotency_key, title, slug, lesson_count, created_at",
        )
        .bind(CourseId::new())
        .bind(&course.idempotency_key)
        .bind(course.user_id)
        .bind(&course.title)
        .bind(&course.slug)
        .bind(&course.description)
        .bind(course.difficulty.as_str())
        .bind(&course.language)
        .bind(to_i32(u32::try_from(course.lessons.len()).unwrap_or(u32::MAX)))
        .bind(to_i32(course.total_words))
        .bind(to_i32(course.total_tokens))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, SLUG_CONSTRAINT) {
                AppError::with_source(
                    ErrorKind::Conflict,
                    format!("Slug '{}' is already taken", course.slug),
                    e,
                )
            } else {
                AppError::with_source(ErrorKind::Database, "Failed to insert course", e)
            }
        })?;

        let Some(row) = inserted else {
            drop(tx);
            debug!(
                idempotency_key = %course.idempotency_key,
                "Course already stored under this key"
            );
            return self
                .find_course_by_key(&course.idempotency_key)
                .await?
                .ok_or_else(|| {
                    AppError::conflict(format!(
                        "Course {} vanished after conflicting insert",
                        course.idempotency_key
                    ))
                });
        };

        Self::insert_lessons(&mut tx, row.id, course).await?;

        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit course", e)
        })?;

        info!(
            course_id = %row.id,
            slug = %row.slug,
            lessons = course.lessons.len(),
            "Course stored"
        );
        Ok(row.into())
    }

    async fn upsert_lesson(&self, lesson: &StandaloneLesson) -> AppResult<StoredLesson> {
        let inserted = sqlx::query_as::<_, LessonRow>(
            "INSERT INTO lessons (id, idempotency_key, user_id, topic, title, summary, content, \
             difficulty, language, word_count, tokens_used) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (idempotency_key) DO NOTHING \
             RETURNING id, course_id, title, word_count, created_at",
        )
        .bind(LessonId::new())
        .bind(&lesson.idempotency_key)
        .bind(lesson.user_id)
        .bind(&lesson.topic)
        .bind(&lesson.lesson.title)
        .bind(&lesson.lesson.summary)
        .bind(Json(&lesson.lesson.sections))
        .bind(lesson.difficulty.as_str())
        .bind(&lesson.language)
        .bind(to_i32(lesson.word_count))
        .bind(to_i32(lesson.lesson.tokens_used))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to insert lesson", e))?;

        match inserted {
            Some(row) => Ok(row.into()),
            None => self
                .find_lesson_by_key(&lesson.idempotency_key)
                .await?
                .ok_or_else(|| {
                    AppError::conflict(format!(
                        "Lesson {} vanished after conflicting insert",
                        lesson.idempotency_key
                    ))
                }),
        }
    }
}

/// Whether `err` is a unique violation of `constraint`.
pub(crate) fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation() && db.constraint() == Some(constraint))
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}
