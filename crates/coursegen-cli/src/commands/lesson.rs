//! Enqueue a standalone lesson.

use clap::Args;

use crate::output::{self, OutputFormat};
use coursegen_core::config::AppConfig;
use coursegen_core::error::AppError;
use coursegen_entity::job::{EnqueueOptions, GenerateLessonPayload, TriggerSource};

use super::DifficultyArg;

/// Arguments for the lesson command
#[derive(Debug, Args)]
pub struct LessonArgs {
    /// Requesting user id
    #[arg(short, long)]
    pub user: i64,
    /// Lesson topic
    #[arg(short, long)]
    pub topic: String,
    /// Difficulty
    #[arg(short, long, value_enum, default_value = "beginner")]
    pub difficulty: DifficultyArg,
    /// Programming language of the examples
    #[arg(short, long, default_value = "python")]
    pub language: String,
    /// Programming paradigm preference
    #[arg(long)]
    pub paradigm: Option<String>,
    /// Priority (0 is highest)
    #[arg(long)]
    pub priority: Option<u32>,
    /// Deduplication key; a matching outstanding job is reused
    #[arg(long)]
    pub dedupe_key: Option<String>,
}

/// Execute the lesson command
pub async fn execute(
    args: &LessonArgs,
    config: &AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let queue = super::connect_queue(config).await?;

    let mut options = EnqueueOptions::default();
    if let Some(priority) = args.priority {
        options = options.with_priority(priority);
    }
    if let Some(key) = &args.dedupe_key {
        options = options.with_dedupe_key(key.clone());
    }

    let job_id = queue
        .enqueue(
            GenerateLessonPayload {
                user_id: args.user,
                topic: args.topic.clone(),
                difficulty: args.difficulty.into(),
                language: args.language.clone(),
                paradigm: args.paradigm.clone(),
                trigger: TriggerSource::Cli,
            },
            options,
        )
        .await?;

    match format {
        OutputFormat::Table => output::print_success(&format!("Lesson job enqueued (id: {job_id})")),
        OutputFormat::Json => output::print_item(&serde_json::json!({ "job_id": job_id }), format),
    }
    Ok(())
}
