//! Generation request and generated lesson content.

use serde::{Deserialize, Serialize};

/// Target difficulty of generated content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    /// Return the difficulty as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }
}

/// Position of a lesson inside a course being generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseContext {
    /// Title of the course the lesson belongs to.
    pub course_title: String,
    /// Zero-based ordinal of the lesson.
    pub lesson_index: u32,
    /// Number of lessons in the course.
    pub lesson_count: u32,
}

/// Input to the generation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonRequest {
    /// Requesting user.
    pub user_id: i64,
    /// Lesson topic.
    pub topic: String,
    /// Difficulty.
    pub difficulty: Difficulty,
    /// Programming language of examples.
    pub language: String,
    /// Optional programming paradigm preference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paradigm: Option<String>,
    /// Set when the lesson is part of a course.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<CourseContext>,
}

/// One section of a generated lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonSection {
    /// Section heading.
    pub heading: String,
    /// Section body (markdown).
    pub body: String,
}

/// Structured lesson returned by the generation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedLesson {
    /// Lesson title.
    pub title: String,
    /// Short summary.
    #[serde(default)]
    pub summary: String,
    /// Ordered sections.
    #[serde(default)]
    pub sections: Vec<LessonSection>,
    /// Engine usage reported for this generation.
    #[serde(default)]
    pub tokens_used: u32,
}

impl GeneratedLesson {
    /// Number of whitespace-separated words across summary and sections.
    pub fn word_count(&self) -> u32 {
        let words = self.summary.split_whitespace().count()
            + self
                .sections
                .iter()
                .map(|s| s.heading.split_whitespace().count() + s.body.split_whitespace().count())
                .sum::<usize>();
        u32::try_from(words).unwrap_or(u32::MAX)
    }

    /// Whether the engine returned anything usable.
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() || self.sections.is_empty()
    }
}
