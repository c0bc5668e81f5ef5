//! Notification kind enumeration.

use serde::{Deserialize, Serialize};

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A standalone lesson finished generating.
    LessonReady,
    /// A course flow finished and the course was stored.
    CourseReady,
    /// Generation failed permanently.
    GenerationFailed,
}

impl NotificationKind {
    /// Return the kind as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LessonReady => "lesson_ready",
            Self::CourseReady => "course_ready",
            Self::GenerationFailed => "generation_failed",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lesson_ready" => Ok(Self::LessonReady),
            "course_ready" => Ok(Self::CourseReady),
            "generation_failed" => Ok(Self::GenerationFailed),
            other => Err(format!("unknown notification kind '{other}'")),
        }
    }
}
