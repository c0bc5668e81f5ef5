//! HTTP client for the content generation engine.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use coursegen_core::config::generator::GeneratorConfig;
use coursegen_core::error::{AppError, ErrorKind};
use coursegen_core::result::AppResult;
use coursegen_entity::content::{ContentGenerator, GeneratedLesson, LessonRequest};

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Request body sent to the engine.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    #[serde(flatten)]
    request: &'a LessonRequest,
}

/// Generation engine reached over HTTP with a bearer key.
#[derive(Clone)]
pub struct HttpContentGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for HttpContentGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpContentGenerator")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl HttpContentGenerator {
    /// Create a client. Fails when the endpoint or key is missing.
    pub fn new(config: &GeneratorConfig) -> AppResult<Self> {
        config.validate_credentials()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds.max(1)))
            .build()
            .map_err(|e| {
                AppError::with_source(ErrorKind::Configuration, "Failed to create HTTP client", e)
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone().unwrap_or_default(),
            api_key: config.api_key.clone().unwrap_or_default(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl ContentGenerator for HttpContentGenerator {
    async fn generate_lesson(&self, request: &LessonRequest) -> AppResult<GeneratedLesson> {
        debug!(
            endpoint = %self.endpoint,
            topic = %request.topic,
            lesson_index = request.course.as_ref().map(|c| c.lesson_index),
            "Requesting lesson from generation engine"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&GenerateRequest {
                model: &self.model,
                request,
            })
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY));
            return Err(AppError::external(format!(
                "Generation engine returned {status}: {body}"
            )));
        }

        response.json::<GeneratedLesson>().await.map_err(|e| {
            AppError::with_source(
                ErrorKind::ExternalService,
                "Failed to decode generation engine response",
                e,
            )
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::with_source(ErrorKind::Timeout, "Generation engine request timed out", e)
    } else {
        AppError::with_source(
            ErrorKind::ExternalService,
            "Failed to reach generation engine",
            e,
        )
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|i| s.is_char_boundary(*i)).unwrap_or(0)
}
