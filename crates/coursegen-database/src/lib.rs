//! # coursegen-database
//!
//! PostgreSQL connection management and the concrete course and
//! notification stores used by the job processors.

pub mod connection;
pub mod migration;
pub mod repositories;

pub use connection::DatabasePool;
pub use repositories::{PgCourseStore, PgNotificationStore};
