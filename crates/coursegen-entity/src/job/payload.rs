//! Typed job payload definitions.
//!
//! Every job name has exactly one payload struct. Payloads are validated at
//! enqueue time and are immutable afterwards.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::{Validate, ValidationError};

use coursegen_core::error::AppError;
use coursegen_core::result::AppResult;

use super::name::JobName;
use crate::content::Difficulty;
use crate::notification::NotificationKind;

/// Upper bound on lessons in one course flow.
pub const MAX_COURSE_LESSONS: u32 = 50;

/// What caused a job to be submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// A user action in the web layer.
    #[default]
    Web,
    /// A scheduled trigger.
    Scheduled,
    /// A chat interaction.
    Chat,
    /// The operator CLI.
    Cli,
}

/// Payload of `generate-lesson`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct GenerateLessonPayload {
    /// Requester.
    #[validate(range(min = 1))]
    pub user_id: i64,
    /// Lesson topic.
    #[validate(length(min = 1, max = 200))]
    pub topic: String,
    /// Difficulty.
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Programming language of examples.
    #[validate(length(min = 1, max = 50))]
    pub language: String,
    /// Optional programming paradigm preference.
    #[serde(default)]
    pub paradigm: Option<String>,
    /// What triggered the request.
    #[serde(default)]
    pub trigger: TriggerSource,
}

/// Payload of `generate-single-lesson`, one child of a course flow.
///
/// The parent linkage is carried by the job record itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_lesson_index"))]
pub struct GenerateSingleLessonPayload {
    /// Requester.
    #[validate(range(min = 1))]
    pub user_id: i64,
    /// Title of the course being assembled.
    #[validate(length(min = 1, max = 200))]
    pub course_title: String,
    /// This lesson's slice of the course topic.
    #[validate(length(min = 1, max = 200))]
    pub topic: String,
    /// Zero-based ordinal of this lesson in the course.
    pub lesson_index: u32,
    /// Number of lessons in the course.
    #[validate(range(min = 1, max = MAX_COURSE_LESSONS))]
    pub lesson_count: u32,
    /// Difficulty.
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Programming language of examples.
    #[validate(length(min = 1, max = 50))]
    pub language: String,
    /// Optional programming paradigm preference.
    #[serde(default)]
    pub paradigm: Option<String>,
}

fn validate_lesson_index(payload: &GenerateSingleLessonPayload) -> Result<(), ValidationError> {
    if payload.lesson_index >= payload.lesson_count {
        return Err(ValidationError::new("lesson_index_out_of_range"));
    }
    Ok(())
}

/// Payload of `finalize-course`, the aggregator of a course flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct FinalizeCoursePayload {
    /// Requester and course owner.
    #[validate(range(min = 1))]
    pub user_id: i64,
    /// Course title.
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    /// Overall course topic.
    #[validate(length(min = 1, max = 200))]
    pub topic: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Difficulty.
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Programming language of examples.
    #[validate(length(min = 1, max = 50))]
    pub language: String,
    /// Number of lessons requested.
    #[validate(range(min = 1, max = MAX_COURSE_LESSONS))]
    pub lesson_count: u32,
    /// What triggered the request.
    #[serde(default)]
    pub trigger: TriggerSource,
}

/// Payload of `create-notification`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CreateNotificationPayload {
    /// Recipient.
    #[validate(range(min = 1))]
    pub user_id: i64,
    /// Kind of notification.
    pub kind: NotificationKind,
    /// Title.
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    /// Body text.
    #[validate(length(max = 2000))]
    pub message: String,
    /// Related resource.
    #[serde(default)]
    pub resource_id: Option<String>,
    /// Delivery idempotency key.
    #[validate(length(min = 1, max = 255))]
    pub idempotency_key: String,
}

/// A payload tagged with the job name that consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data", rename_all = "kebab-case")]
pub enum JobPayload {
    /// Standalone lesson generation.
    GenerateLesson(GenerateLessonPayload),
    /// One lesson of a course flow.
    GenerateSingleLesson(GenerateSingleLessonPayload),
    /// Course flow aggregator.
    FinalizeCourse(FinalizeCoursePayload),
    /// Notification delivery.
    CreateNotification(CreateNotificationPayload),
}

impl JobPayload {
    /// Job name this payload belongs to.
    pub fn name(&self) -> JobName {
        match self {
            Self::GenerateLesson(_) => JobName::GenerateLesson,
            Self::GenerateSingleLesson(_) => JobName::GenerateSingleLesson,
            Self::FinalizeCourse(_) => JobName::FinalizeCourse,
            Self::CreateNotification(_) => JobName::CreateNotification,
        }
    }

    /// Validate against the job name's schema.
    pub fn validate(&self) -> AppResult<()> {
        match self {
            Self::GenerateLesson(p) => p.validate()?,
            Self::GenerateSingleLesson(p) => p.validate()?,
            Self::FinalizeCourse(p) => p.validate()?,
            Self::CreateNotification(p) => p.validate()?,
        }
        Ok(())
    }

    /// Serialize only the inner payload, as stored on the job record.
    pub fn to_data(&self) -> AppResult<Value> {
        let value = match self {
            Self::GenerateLesson(p) => serde_json::to_value(p)?,
            Self::GenerateSingleLesson(p) => serde_json::to_value(p)?,
            Self::FinalizeCourse(p) => serde_json::to_value(p)?,
            Self::CreateNotification(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }

    /// Rebuild a tagged payload from a job name and its stored data.
    pub fn from_parts(name: JobName, data: Value) -> AppResult<Self> {
        let payload = match name {
            JobName::GenerateLesson => Self::GenerateLesson(decode(data)?),
            JobName::GenerateSingleLesson => Self::GenerateSingleLesson(decode(data)?),
            JobName::FinalizeCourse => Self::FinalizeCourse(decode(data)?),
            JobName::CreateNotification => Self::CreateNotification(decode(data)?),
        };
        Ok(payload)
    }
}

impl From<GenerateLessonPayload> for JobPayload {
    fn from(payload: GenerateLessonPayload) -> Self {
        Self::GenerateLesson(payload)
    }
}

impl From<GenerateSingleLessonPayload> for JobPayload {
    fn from(payload: GenerateSingleLessonPayload) -> Self {
        Self::GenerateSingleLesson(payload)
    }
}

impl From<FinalizeCoursePayload> for JobPayload {
    fn from(payload: FinalizeCoursePayload) -> Self {
        Self::FinalizeCourse(payload)
    }
}

impl From<CreateNotificationPayload> for JobPayload {
    fn from(payload: CreateNotificationPayload) -> Self {
        Self::CreateNotification(payload)
    }
}

fn decode<T: DeserializeOwned>(data: Value) -> AppResult<T> {
    serde_json::from_value(data)
        .map_err(|e| AppError::validation(format!("Invalid job payload: {e}")))
}
