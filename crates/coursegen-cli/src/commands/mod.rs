//! CLI command definitions and dispatch.

pub mod course;
pub mod job;
pub mod lesson;
pub mod migrate;
pub mod queue;

use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use crate::output::OutputFormat;
use coursegen_core::config::AppConfig;
use coursegen_core::error::AppError;
use coursegen_entity::content::Difficulty;
use coursegen_entity::job::JobOptions;
use coursegen_queue::StoreProvider;
use coursegen_worker::JobQueue;

/// CourseGen job queue operator tool
#[derive(Debug, Parser)]
#[command(name = "coursegen", version, about, long_about = None)]
pub struct Cli {
    /// Base configuration file (without extension)
    #[arg(short, long, default_value = "config/default")]
    pub config: String,

    /// Environment overlay loaded from `config/<env>.toml`
    #[arg(short, long, default_value = "development", env = "COURSEGEN_ENV")]
    pub env: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Enqueue a standalone lesson
    Lesson(lesson::LessonArgs),
    /// Start a multi-lesson course flow
    Course(course::CourseArgs),
    /// Show a job's status
    Status(job::StatusArgs),
    /// Queue metrics and maintenance
    Queue(queue::QueueArgs),
    /// Course datastore migrations
    Migrate(migrate::MigrateArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<(), AppError> {
        let config = AppConfig::load_from(&self.config, &self.env)?;
        match &self.command {
            Commands::Lesson(args) => lesson::execute(args, &config, self.format).await,
            Commands::Course(args) => course::execute(args, &config, self.format).await,
            Commands::Status(args) => job::execute(args, &config, self.format).await,
            Commands::Queue(args) => queue::execute(args, &config, self.format).await,
            Commands::Migrate(args) => migrate::execute(args, &config).await,
        }
    }
}

/// Difficulty accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DifficultyArg {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl From<DifficultyArg> for Difficulty {
    fn from(arg: DifficultyArg) -> Self {
        match arg {
            DifficultyArg::Beginner => Difficulty::Beginner,
            DifficultyArg::Intermediate => Difficulty::Intermediate,
            DifficultyArg::Advanced => Difficulty::Advanced,
        }
    }
}

/// Helper: connect to the queue store and build the producer API
pub async fn connect_queue(config: &AppConfig) -> Result<JobQueue, AppError> {
    let provider = StoreProvider::new(&config.queue).await?;
    Ok(JobQueue::new(
        provider.shared(),
        JobOptions::from_defaults(&config.jobs),
    ))
}

/// Helper: all queues the worker configuration knows about
pub fn configured_queues(config: &AppConfig) -> Vec<String> {
    config.worker.queues.clone()
}
