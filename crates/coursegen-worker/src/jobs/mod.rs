//! Built-in job processor implementations.

pub mod finalize_course;
pub mod generate_lesson;
pub mod generate_single_lesson;
pub mod notification;

pub use finalize_course::FinalizeCourseProcessor;
pub use generate_lesson::GenerateLessonProcessor;
pub use generate_single_lesson::GenerateSingleLessonProcessor;
pub use notification::CreateNotificationProcessor;

#[cfg(test)]
pub(crate) mod test_support;
