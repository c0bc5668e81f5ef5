//! `create-notification`: deliver a user notification.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use coursegen_entity::job::{CreateNotificationPayload, JobName, NotificationResult};
use coursegen_entity::notification::{NewNotification, NotificationSink};

use crate::executor::{JobContext, JobExecutionError, JobProcessor};

/// Hands notifications to the configured sink.
#[derive(Debug)]
pub struct CreateNotificationProcessor {
    sink: Arc<dyn NotificationSink>,
}

impl CreateNotificationProcessor {
    /// Create the processor.
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl JobProcessor for CreateNotificationProcessor {
    fn name(&self) -> JobName {
        JobName::CreateNotification
    }

    async fn process(&self, ctx: &JobContext) -> Result<Value, JobExecutionError> {
        let payload: CreateNotificationPayload = ctx.payload()?;

        let delivered = self
            .sink
            .deliver(&NewNotification {
                user_id: payload.user_id,
                kind: payload.kind,
                title: payload.title,
                message: payload.message,
                resource_id: payload.resource_id,
                idempotency_key: payload.idempotency_key,
            })
            .await?;

        info!(
            job_id = %ctx.job_id(),
            notification_id = %delivered.id,
            user_id = delivered.user_id,
            kind = %delivered.kind,
            "Notification delivered"
        );

        Ok(serde_json::to_value(NotificationResult {
            notification_id: delivered.id,
        })?)
    }
}
