//! Result payloads stored on completed jobs.

use serde::{Deserialize, Serialize};

use coursegen_core::types::{CourseId, LessonId, NotificationId};

use crate::content::GeneratedLesson;

/// Result of `generate-lesson`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonResult {
    /// Stored lesson.
    pub lesson_id: LessonId,
    /// Lesson title.
    pub title: String,
    /// Word count.
    pub word_count: u32,
    /// Engine usage.
    pub tokens_used: u32,
}

/// Result of `generate-single-lesson`: a fragment the aggregator reassembles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonFragment {
    /// Ordinal of the lesson within its course.
    pub lesson_index: u32,
    /// Generated content.
    pub lesson: GeneratedLesson,
    /// Word count.
    pub word_count: u32,
}

/// Result of `finalize-course`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseResult {
    /// Stored course.
    pub course_id: CourseId,
    /// Course title.
    pub title: String,
    /// Final slug after collision resolution.
    pub slug: String,
    /// Lessons written.
    pub lesson_count: u32,
    /// Ordinals of children that produced no result.
    pub missing_lessons: Vec<u32>,
    /// Total words across lessons.
    pub total_words: u32,
    /// Total engine usage across lessons.
    pub total_tokens: u32,
    /// Whether an earlier attempt had already written the course.
    pub reused: bool,
}

/// Result of `create-notification`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationResult {
    /// Delivered notification.
    pub notification_id: NotificationId,
}
