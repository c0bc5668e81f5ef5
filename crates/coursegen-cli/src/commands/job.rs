//! Job status lookup.

use clap::Args;

use crate::output::{self, OutputFormat};
use coursegen_core::config::AppConfig;
use coursegen_core::error::AppError;
use coursegen_core::types::JobId;

/// Arguments for the status command
#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Job id
    pub job_id: String,
}

/// Execute the status command
pub async fn execute(
    args: &StatusArgs,
    config: &AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let queue = super::connect_queue(config).await?;
    let status = queue.get_status(&JobId::from(args.job_id.as_str())).await?;

    if format == OutputFormat::Json {
        output::print_item(&status, format);
        return Ok(());
    }

    output::print_kv("Id", status.id.as_str());
    output::print_kv("Name", status.name.as_str());
    output::print_kv("Queue", &status.queue);
    output::print_kv("State", status.state.as_str());
    output::print_kv(
        "Attempts",
        &format!("{}/{}", status.attempts_made, status.max_attempts),
    );
    if let Some(progress) = &status.progress {
        output::print_kv(
            "Progress",
            &format!("{}% {}", progress.percentage, progress.message),
        );
    }
    if let Some(error) = &status.error {
        output::print_kv("Error", error);
    }
    if let Some(result) = &status.result {
        output::print_kv("Result", &result.to_string());
    }
    output::print_kv("Created", &status.created_at.to_rfc3339());
    if let Some(finished) = status.finished_at {
        output::print_kv("Finished", &finished.to_rfc3339());
    }
    Ok(())
}
