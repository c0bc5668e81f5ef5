//! Queue metrics and cleanup commands.

use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use coursegen_core::config::AppConfig;
use coursegen_core::error::AppError;
use coursegen_entity::job::{JobState, QueueMetrics};

/// Arguments for queue commands
#[derive(Debug, Args)]
pub struct QueueArgs {
    /// Queue subcommand
    #[command(subcommand)]
    pub command: QueueCommand,
}

/// Queue subcommands
#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// Show counts per state
    Metrics {
        /// Queues to show (defaults to the configured worker queues)
        #[arg(short, long)]
        queue: Vec<String>,
    },
    /// Remove finished jobs
    Clean {
        /// Queue to clean
        #[arg(short, long)]
        queue: String,
        /// Which finished jobs to remove
        #[arg(short, long, value_enum, default_value = "completed")]
        state: FinishedState,
        /// Only remove jobs finished more than this many seconds ago
        #[arg(long, default_value_t = 0)]
        older_than: u64,
        /// Always keep this many of the newest jobs
        #[arg(long, default_value_t = 0)]
        keep: u64,
    },
}

/// Terminal states that can be cleaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FinishedState {
    Completed,
    Failed,
}

impl From<FinishedState> for JobState {
    fn from(state: FinishedState) -> Self {
        match state {
            FinishedState::Completed => JobState::Completed,
            FinishedState::Failed => JobState::Failed,
        }
    }
}

/// Metrics row for display
#[derive(Debug, Serialize, Tabled)]
struct MetricsRow {
    queue: String,
    waiting: u64,
    active: u64,
    delayed: u64,
    #[tabled(rename = "waiting-children")]
    waiting_children: u64,
    completed: u64,
    failed: u64,
}

impl From<QueueMetrics> for MetricsRow {
    fn from(m: QueueMetrics) -> Self {
        Self {
            queue: m.queue,
            waiting: m.waiting,
            active: m.active,
            delayed: m.delayed,
            waiting_children: m.waiting_children,
            completed: m.completed,
            failed: m.failed,
        }
    }
}

/// Execute queue commands
pub async fn execute(
    args: &QueueArgs,
    config: &AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let queue = super::connect_queue(config).await?;

    match &args.command {
        QueueCommand::Metrics { queue: names } => {
            let names = if names.is_empty() {
                super::configured_queues(config)
            } else {
                names.clone()
            };

            let mut rows = Vec::with_capacity(names.len());
            for name in &names {
                rows.push(MetricsRow::from(queue.get_metrics(name).await?));
            }
            output::print_list(&rows, format);
        }
        QueueCommand::Clean {
            queue: name,
            state,
            older_than,
            keep,
        } => {
            let removed = queue
                .clean(
                    name,
                    Duration::from_secs(*older_than),
                    *keep,
                    (*state).into(),
                )
                .await?;
            output::print_success(&format!("Removed {removed} jobs from '{name}'"));
        }
    }

    Ok(())
}
