//! Course datastore migration commands.

use clap::{Args, Subcommand};

use crate::output;
use coursegen_core::config::AppConfig;
use coursegen_core::error::AppError;
use coursegen_database::DatabasePool;

/// Arguments for the migrate command
#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Migration subcommand
    #[command(subcommand)]
    pub command: MigrateCommand,
}

/// Migration subcommands
#[derive(Debug, Subcommand)]
pub enum MigrateCommand {
    /// Run all pending migrations
    Run,
    /// Check that the datastore is reachable
    Check,
}

/// Execute migration commands
pub async fn execute(args: &MigrateArgs, config: &AppConfig) -> Result<(), AppError> {
    let pool = DatabasePool::connect(&config.database).await?;

    let result = match &args.command {
        MigrateCommand::Run => coursegen_database::migration::run_migrations(pool.pool())
            .await
            .map(|()| output::print_success("All migrations applied.")),
        MigrateCommand::Check => pool.health_check().await.map(|ok| {
            if ok {
                output::print_success("Course datastore is reachable.");
            } else {
                output::print_warning("Course datastore answered unexpectedly.");
            }
        }),
    };

    pool.close().await;
    result
}
