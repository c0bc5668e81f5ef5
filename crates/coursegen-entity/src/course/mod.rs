//! Persisted course content and the course store interface.

pub mod model;
pub mod slug;
pub mod store;

pub use model::{NewCourse, NewLesson, StandaloneLesson, StoredCourse, StoredLesson};
pub use slug::{slugify, with_suffix};
pub use store::CourseStore;
