//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate, overlaid with `COURSEGEN__`-prefixed environment
//! variables. The resulting [`AppConfig`] is built once at process start
//! and passed down explicitly.

pub mod connection;
pub mod database;
pub mod generator;
pub mod jobs;
pub mod logging;
pub mod worker;

use serde::{Deserialize, Serialize};

use self::connection::ConnectionConfig;
use self::database::DatabaseConfig;
use self::generator::GeneratorConfig;
use self::jobs::{JobDefaultsConfig, RetentionConfig};
use self::logging::LoggingConfig;
use self::worker::WorkerConfig;

use crate::error::AppError;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Durable queue store connection settings.
    #[serde(default)]
    pub queue: ConnectionConfig,
    /// Worker pool settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Default policy applied to every enqueued job.
    #[serde(default)]
    pub jobs: JobDefaultsConfig,
    /// Periodic retention sweep settings.
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Content generation engine settings.
    #[serde(default)]
    pub generator: GeneratorConfig,
    /// Persistent datastore settings.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges `config/default.toml` with an environment-specific overlay
    /// and environment variables prefixed with `COURSEGEN__`.
    pub fn load(env: &str) -> Result<Self, AppError> {
        Self::load_from("config/default", env)
    }

    /// Load configuration using an explicit base file path (without extension).
    pub fn load_from(base: &str, env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(base).required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("COURSEGEN")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("worker.queues")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}
