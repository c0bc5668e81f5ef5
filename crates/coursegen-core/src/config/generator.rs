//! Content generation engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Settings for the external content generation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// HTTP endpoint of the generation engine.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bearer credential for the engine.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model identifier forwarded with each request.
    #[serde(default = "default_model")]
    pub model: String,
    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: default_model(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl GeneratorConfig {
    /// Fail fast when the engine credentials are missing.
    pub fn validate_credentials(&self) -> Result<(), AppError> {
        let missing_endpoint = self.endpoint.as_deref().is_none_or(|e| e.trim().is_empty());
        if missing_endpoint {
            return Err(AppError::configuration(
                "generator.endpoint is required (COURSEGEN__GENERATOR__ENDPOINT)",
            ));
        }
        let missing_key = self.api_key.as_deref().is_none_or(|k| k.trim().is_empty());
        if missing_key {
            return Err(AppError::configuration(
                "generator.api_key is required (COURSEGEN__GENERATOR__API_KEY)",
            ));
        }
        Ok(())
    }
}

fn default_model() -> String {
    "lesson-writer-v1".to_string()
}

fn default_request_timeout() -> u64 {
    240
}
