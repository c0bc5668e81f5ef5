//! Course and lesson records written by the job processors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coursegen_core::types::{CourseId, LessonId};

use crate::content::{Difficulty, GeneratedLesson};

/// One ordered lesson of a course about to be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLesson {
    /// Zero-based position inside the course.
    pub position: u32,
    /// Generated content.
    pub lesson: GeneratedLesson,
    /// Word count of the content.
    pub word_count: u32,
}

/// A course and all of its lessons, written as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCourse {
    /// Key that makes the write idempotent (the finalize job's id).
    pub idempotency_key: String,
    /// Owner.
    pub user_id: i64,
    /// Course title.
    pub title: String,
    /// URL slug; unique across courses.
    pub slug: String,
    /// Optional description.
    pub description: Option<String>,
    /// Difficulty.
    pub difficulty: Difficulty,
    /// Programming language of examples.
    pub language: String,
    /// Lessons ordered by position.
    pub lessons: Vec<NewLesson>,
    /// Sum of lesson word counts.
    pub total_words: u32,
    /// Sum of engine usage across lessons.
    pub total_tokens: u32,
}

/// A lesson that does not belong to a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandaloneLesson {
    /// Key that makes the write idempotent (the job's id).
    pub idempotency_key: String,
    /// Owner.
    pub user_id: i64,
    /// Requested topic.
    pub topic: String,
    /// Difficulty.
    pub difficulty: Difficulty,
    /// Programming language of examples.
    pub language: String,
    /// Generated content.
    pub lesson: GeneratedLesson,
    /// Word count of the content.
    pub word_count: u32,
}

/// A persisted course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCourse {
    /// Course identifier.
    pub id: CourseId,
    /// Key the course was written under.
    pub idempotency_key: String,
    /// Course title.
    pub title: String,
    /// Final slug.
    pub slug: String,
    /// Number of lessons written with the course.
    pub lesson_count: u32,
    /// When the course was written.
    pub created_at: DateTime<Utc>,
}

/// A persisted lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLesson {
    /// Lesson identifier.
    pub id: LessonId,
    /// Owning course, if any.
    pub course_id: Option<CourseId>,
    /// Lesson title.
    pub title: String,
    /// Word count.
    pub word_count: u32,
    /// When the lesson was written.
    pub created_at: DateTime<Utc>,
}
