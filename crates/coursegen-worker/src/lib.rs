//! Background job processing for CourseGen.
//!
//! This crate provides:
//! - The producer API ([`JobQueue`]) and flow registration ([`FlowProducer`])
//! - A worker pool that claims, leases, and executes queued jobs
//! - Processors for lesson generation, course finalization, and notifications
//! - A cron scheduler for retention sweeps

pub mod course;
pub mod events;
pub mod executor;
pub mod flow;
pub mod generator;
pub mod jobs;
pub mod queue;
pub mod rate_limit;
pub mod runner;
pub mod scheduler;

pub use course::{CoursePlan, FlowSpec};
pub use events::{WorkerEvent, spawn_event_logger};
pub use executor::{JobContext, JobExecutionError, JobProcessor, ProcessorRegistry};
pub use flow::FlowProducer;
pub use generator::HttpContentGenerator;
pub use queue::JobQueue;
pub use runner::{WorkerHandle, WorkerPool};
pub use scheduler::RetentionScheduler;
