//! # coursegen-queue
//!
//! Durable job queue store for CourseGen. Two backends are available:
//!
//! - **redis**: shared store backed by Redis; every state transition is a
//!   Lua script so concurrent workers across processes stay consistent
//! - **memory**: in-process store for tests and single-process runs
//!
//! The backend is selected at runtime based on configuration.

pub mod connection;
pub mod keys;
#[cfg(feature = "memory")]
pub mod memory;
pub mod provider;
#[cfg(feature = "redis-backend")]
pub mod redis;
pub mod store;

pub use connection::{ConnectionProvider, ReconnectPolicy, ResolvedConnection};
pub use provider::StoreProvider;
pub use store::{AddOutcome, QueueStore, STALLED_REASON, StalledJob, StalledOutcome};

#[cfg(feature = "memory")]
pub use memory::MemoryQueueStore;
#[cfg(feature = "redis-backend")]
pub use redis::RedisQueueStore;
