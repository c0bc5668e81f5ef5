//! Content produced by the external generation engine.

pub mod generator;
pub mod model;

pub use generator::ContentGenerator;
pub use model::{CourseContext, Difficulty, GeneratedLesson, LessonRequest, LessonSection};
