//! Schema migrations for the course datastore.

use sqlx::PgPool;
use tracing::info;

use coursegen_core::error::{AppError, ErrorKind};

/// Apply pending migrations from the workspace `migrations/` directory.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    let migrator = sqlx::migrate!("../../migrations");
    info!(
        migrations = migrator.iter().count(),
        "Applying course datastore migrations"
    );

    migrator.run(pool).await.map_err(|e| {
        AppError::with_source(
            ErrorKind::Database,
            format!("Failed to run migrations: {e}"),
            e,
        )
    })?;

    info!("Course datastore schema is up to date");
    Ok(())
}
