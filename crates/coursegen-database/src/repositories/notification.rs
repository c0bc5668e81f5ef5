//! Notification repository: the delivery sink backed by PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use coursegen_core::error::{AppError, ErrorKind};
use coursegen_core::result::AppResult;
use coursegen_core::types::NotificationId;
use coursegen_entity::notification::{
    DeliveredNotification, NewNotification, NotificationKind, NotificationSink,
};

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: NotificationId,
    user_id: i64,
    kind: String,
    idempotency_key: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for DeliveredNotification {
    type Error = AppError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let kind = row
            .kind
            .parse::<NotificationKind>()
            .map_err(AppError::database)?;
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            kind,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
        })
    }
}

/// Stores notifications for the in-app inbox.
#[derive(Debug, Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    /// Create a new notification store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Count unread notifications for a user.
    pub async fn count_unread(&self, user_id: i64) -> AppResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND NOT is_read")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to count unread", e))
    }
}

#[async_trait]
impl NotificationSink for PgNotificationStore {
    async fn deliver(&self, notification: &NewNotification) -> AppResult<DeliveredNotification> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query_as::<_, NotificationRow>(
            "INSERT INTO notifications (id, user_id, kind, title, message, resource_id, idempotency_key) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (idempotency_key) DO UPDATE SET idempotency_key = EXCLUDED.idempotency_key \
             RETURNING id, user_id, kind, idempotency_key, created_at",
        )
        .bind(NotificationId::new())
        .bind(notification.user_id)
        .bind(notification.kind.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.resource_id)
        .bind(&notification.idempotency_key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to store notification", e)
        })?;

        row.try_into()
    }
}
