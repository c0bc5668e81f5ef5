//! Notification delivery interface.

use async_trait::async_trait;

use coursegen_core::result::AppResult;

use super::model::{DeliveredNotification, NewNotification};

/// Delivers user notifications.
///
/// Delivery is keyed by [`NewNotification::idempotency_key`]: delivering
/// the same key twice returns the first delivery instead of notifying
/// the user again.
#[async_trait]
pub trait NotificationSink: Send + Sync + std::fmt::Debug + 'static {
    /// Deliver a notification.
    async fn deliver(&self, notification: &NewNotification) -> AppResult<DeliveredNotification>;
}
