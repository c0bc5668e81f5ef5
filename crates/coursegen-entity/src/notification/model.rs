//! Notification records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coursegen_core::types::NotificationId;

use super::category::NotificationKind;

/// A notification to be delivered to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotification {
    /// Recipient.
    pub user_id: i64,
    /// Kind of notification.
    pub kind: NotificationKind,
    /// Title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Related resource (course or lesson id), if any.
    pub resource_id: Option<String>,
    /// Deliveries with the same key are collapsed into one.
    pub idempotency_key: String,
}

/// A notification after delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveredNotification {
    /// Notification identifier.
    pub id: NotificationId,
    /// Recipient.
    pub user_id: i64,
    /// Kind of notification.
    pub kind: NotificationKind,
    /// Key the delivery was recorded under.
    pub idempotency_key: String,
    /// When the notification was first delivered.
    pub created_at: DateTime<Utc>,
}
