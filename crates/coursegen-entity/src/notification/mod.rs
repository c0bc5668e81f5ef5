//! Notification delivery models and the delivery interface.

pub mod category;
pub mod model;
pub mod sink;

pub use category::NotificationKind;
pub use model::{DeliveredNotification, NewNotification};
pub use sink::NotificationSink;
