//! Persistence seam between the ingestion pipeline and the database.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    NewNotification, Notification, NotificationId, NotificationStatus, NotificationType, Reading,
    ReadingId,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

/// Storage used by the ingestion pipeline. Implementations must be safe to
/// call from many tasks at once.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Durably store a reading (and register its device).
    async fn save_reading(&self, reading: &Reading) -> Result<ReadingId>;

    /// Newest `pending` or `sent` notification of `kind` for the device.
    async fn latest_active_notification(
        &self,
        device_id: &str,
        kind: NotificationType,
    ) -> Result<Option<Notification>>;

    async fn save_notification(&self, notification: &NewNotification) -> Result<Notification>;

    /// All notifications for a device, newest first.
    async fn notifications_for_device(&self, device_id: &str) -> Result<Vec<Notification>>;

    /// Move a notification to `status`. Acknowledging records who did it and
    /// when. Returns `None` for an unknown id.
    async fn update_notification_status(
        &self,
        id: NotificationId,
        status: NotificationStatus,
        acknowledged_by: Option<i64>,
    ) -> Result<Option<Notification>>;
}
