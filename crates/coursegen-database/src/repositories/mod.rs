//! Store implementations over PostgreSQL.

pub mod course;
pub mod notification;

pub use course::PgCourseStore;
pub use notification::PgNotificationStore;
