//! Shared domain types.

pub mod id;

pub use id::{CourseId, JobId, LessonId, NotificationId};
