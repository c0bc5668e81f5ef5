//! CourseGen worker: runs the job processors against the queue store.
//!
//! Wires the queue store, course datastore, generation engine, and worker
//! pool together and runs until SIGINT or SIGTERM.

use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt};

use coursegen_core::config::AppConfig;
use coursegen_core::error::AppError;
use coursegen_database::DatabasePool;
use coursegen_entity::job::JobOptions;
use coursegen_queue::StoreProvider;
use coursegen_worker::jobs::{
    CreateNotificationProcessor, FinalizeCourseProcessor, GenerateLessonProcessor,
    GenerateSingleLessonProcessor,
};
use coursegen_worker::{
    HttpContentGenerator, JobQueue, ProcessorRegistry, RetentionScheduler, WorkerPool,
    spawn_event_logger,
};

#[tokio::main]
async fn main() {
    let env = std::env::var("COURSEGEN_ENV").unwrap_or_else(|_| "development".to_string());
    let config_base =
        std::env::var("COURSEGEN_CONFIG").unwrap_or_else(|_| "config/default".to_string());

    let config = match AppConfig::load_from(&config_base, &env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);
    tracing::info!(config = %config_base, env = %env, "Configuration loaded");

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Worker exited with error");
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting CourseGen worker v{}", env!("CARGO_PKG_VERSION"));

    // Refuse to start without engine credentials.
    let generator = Arc::new(HttpContentGenerator::new(&config.generator)?);

    let provider = StoreProvider::new(&config.queue).await?;
    let queue = JobQueue::new(provider.shared(), JobOptions::from_defaults(&config.jobs));

    let db = DatabasePool::connect(&config.database).await?;
    coursegen_database::migration::run_migrations(db.pool()).await?;
    let courses = Arc::new(db.course_store());
    let notifications = Arc::new(db.notification_store());

    let mut registry = ProcessorRegistry::new();
    registry.register(Arc::new(GenerateLessonProcessor::new(
        generator.clone(),
        courses.clone(),
        queue.clone(),
    )))?;
    registry.register(Arc::new(GenerateSingleLessonProcessor::new(generator)))?;
    registry.register(Arc::new(FinalizeCourseProcessor::new(
        courses,
        queue.clone(),
    )))?;
    registry.register(Arc::new(CreateNotificationProcessor::new(notifications)))?;

    let pool = WorkerPool::new(provider.shared(), registry, config.worker.clone());
    let event_logger = spawn_event_logger(pool.subscribe());
    let handle = pool.start()?;

    let mut scheduler = RetentionScheduler::new(Arc::new(queue)).await?;
    scheduler
        .register(&config.retention, config.worker.queues.clone())
        .await?;
    scheduler.start().await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, draining worker pool");

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "Scheduler shutdown failed");
    }
    let drained = handle.shutdown().await;
    event_logger.abort();
    db.close().await;

    drained?;
    tracing::info!("CourseGen worker stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
