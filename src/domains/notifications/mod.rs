//! Notification records: status tracking for offers sent to candidates.
//! Delivery itself belongs to the external dispatcher.

pub mod models;
pub mod store;

pub use models::{NotificationRecord, NotificationStatus};
pub use store::PostgresNotificationStore;
