//! Start a course generation flow.

use chrono::Utc;
use clap::Args;

use crate::output::{self, OutputFormat};
use coursegen_core::config::AppConfig;
use coursegen_core::error::AppError;
use coursegen_entity::job::TriggerSource;
use coursegen_worker::{CoursePlan, FlowProducer};

use super::DifficultyArg;

/// Arguments for the course command
#[derive(Debug, Args)]
pub struct CourseArgs {
    /// Requesting user id
    #[arg(short, long)]
    pub user: i64,
    /// Course title
    #[arg(long)]
    pub title: String,
    /// Overall course topic
    #[arg(short, long)]
    pub topic: String,
    /// Course description
    #[arg(long)]
    pub description: Option<String>,
    /// One topic per lesson, in order (repeat the flag)
    #[arg(long = "lesson", required = true)]
    pub lessons: Vec<String>,
    /// Difficulty
    #[arg(short, long, value_enum, default_value = "beginner")]
    pub difficulty: DifficultyArg,
    /// Programming language of the examples
    #[arg(short, long, default_value = "python")]
    pub language: String,
    /// Programming paradigm preference
    #[arg(long)]
    pub paradigm: Option<String>,
}

/// Execute the course command
pub async fn execute(
    args: &CourseArgs,
    config: &AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let queue = super::connect_queue(config).await?;
    let producer = FlowProducer::new(queue);

    let plan = CoursePlan {
        user_id: args.user,
        title: args.title.clone(),
        topic: args.topic.clone(),
        description: args.description.clone(),
        difficulty: args.difficulty.into(),
        language: args.language.clone(),
        paradigm: args.paradigm.clone(),
        lesson_topics: args.lessons.clone(),
        trigger: TriggerSource::Cli,
        requested_at: Utc::now(),
    };

    let handle = plan.into_flow()?.start(&producer).await?;

    match format {
        OutputFormat::Table => {
            output::print_success("Course flow registered");
            output::print_kv("Finalize job", handle.parent_job_id.as_str());
            output::print_kv("Lesson jobs", &handle.child_count.to_string());
        }
        OutputFormat::Json => output::print_item(&handle, format),
    }
    Ok(())
}
