//! Job names and queue names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies which processor handles a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobName {
    /// Generate and persist one standalone lesson.
    GenerateLesson,
    /// Generate one lesson of a course flow (no persistence).
    GenerateSingleLesson,
    /// Aggregate a course flow's lessons and persist the course.
    FinalizeCourse,
    /// Deliver a user notification.
    CreateNotification,
}

impl JobName {
    /// Return the job name as its wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenerateLesson => "generate-lesson",
            Self::GenerateSingleLesson => "generate-single-lesson",
            Self::FinalizeCourse => "finalize-course",
            Self::CreateNotification => "create-notification",
        }
    }

    /// Queue a job of this name is placed on unless the producer overrides it.
    pub fn default_queue(&self) -> QueueName {
        match self {
            Self::GenerateLesson => QueueName::LessonGeneration,
            Self::GenerateSingleLesson | Self::FinalizeCourse => QueueName::CourseGeneration,
            Self::CreateNotification => QueueName::Notifications,
        }
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate-lesson" => Ok(Self::GenerateLesson),
            "generate-single-lesson" => Ok(Self::GenerateSingleLesson),
            "finalize-course" => Ok(Self::FinalizeCourse),
            "create-notification" => Ok(Self::CreateNotification),
            other => Err(format!("unknown job name '{other}'")),
        }
    }
}

/// Well-known queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    /// Standalone lesson generation.
    LessonGeneration,
    /// Course flows: lesson children and their finalize parent.
    CourseGeneration,
    /// Notification delivery.
    Notifications,
}

impl QueueName {
    /// Return the queue's name in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LessonGeneration => "lesson-generation",
            Self::CourseGeneration => "course-generation",
            Self::Notifications => "notifications",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
