//! PostgreSQL pool for the course datastore.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use coursegen_core::config::database::DatabaseConfig;
use coursegen_core::error::{AppError, ErrorKind};

use crate::repositories::{PgCourseStore, PgNotificationStore};

/// Shared connection pool handed to the stores.
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Connect using the `[database]` settings.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        if config.url.trim().is_empty() {
            return Err(AppError::configuration("database.url is not set"));
        }

        info!(
            url = %mask_password(&config.url),
            max_connections = config.max_connections,
            "Connecting to course datastore"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .min_connections(config.min_connections.min(config.max_connections))
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Database,
                    format!("Failed to connect to course datastore: {e}"),
                    e,
                )
            })?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying sqlx pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Course and lesson store over this pool.
    pub fn course_store(&self) -> PgCourseStore {
        PgCourseStore::new(self.pool.clone())
    }

    /// Notification store over this pool.
    pub fn notification_store(&self) -> PgNotificationStore {
        PgNotificationStore::new(self.pool.clone())
    }

    /// Check connectivity.
    pub async fn health_check(&self) -> Result<bool, AppError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|v| v == 1)
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Health check failed", e))
    }

    /// Close all connections.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Course datastore pool closed");
    }
}

/// Hide the password of a connection URL for logging.
pub(crate) fn mask_password(url: &str) -> String {
    let Some(at_pos) = url.rfind('@') else {
        return url.to_string();
    };
    let scheme_end = url.find("://").map(|p| p + 3).unwrap_or(0);
    match url[..at_pos].rfind(':') {
        Some(colon_pos) if colon_pos > scheme_end => {
            format!("{}:****@{}", &url[..colon_pos], &url[at_pos + 1..])
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_password() {
        assert_eq!(
            mask_password("postgres://coursegen:secret@db:5432/coursegen"),
            "postgres://coursegen:****@db:5432/coursegen"
        );
        assert_eq!(
            mask_password("postgres://db:5432/coursegen"),
            "postgres://db:5432/coursegen"
        );
    }

    #[tokio::test]
    async fn test_empty_url_rejected() {
        let config = DatabaseConfig {
            url: String::new(),
            ..DatabaseConfig::default()
        };
        let err = DatabasePool::connect(&config).await.expect_err("no url");
        assert_eq!(err.kind, ErrorKind::Configuration);
    }
}
