use async_trait::async_trait;

use crate::db::DbPool;
use crate::error::Result;
use crate::models::{
    NewNotification, Notification, NotificationId, NotificationStatus, NotificationType, Reading,
    ReadingId,
};
use crate::repositories::{NotificationRepository, ReadingRepository};
use crate::storage::Storage;

/// Postgres-backed storage. The pool makes concurrent calls safe.
#[derive(Debug, Clone)]
pub struct PgStorage {
    readings: ReadingRepository,
    notifications: NotificationRepository,
}

impl PgStorage {
    pub fn new(pool: DbPool) -> Self {
        Self {
            readings: ReadingRepository::new(pool.clone()),
            notifications: NotificationRepository::new(pool),
        }
    }

    pub fn readings(&self) -> &ReadingRepository {
        &self.readings
    }

    pub fn notifications(&self) -> &NotificationRepository {
        &self.notifications
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn save_reading(&self, reading: &Reading) -> Result<ReadingId> {
        self.readings.insert(reading).await
    }

    async fn latest_active_notification(
        &self,
        device_id: &str,
        kind: NotificationType,
    ) -> Result<Option<Notification>> {
        self.notifications.latest_active(device_id, kind).await
    }

    async fn save_notification(&self, notification: &NewNotification) -> Result<Notification> {
        self.notifications.insert(notification).await
    }

    async fn notifications_for_device(&self, device_id: &str) -> Result<Vec<Notification>> {
        self.notifications.list_for_device(device_id).await
    }

    async fn update_notification_status(
        &self,
        id: NotificationId,
        status: NotificationStatus,
        acknowledged_by: Option<i64>,
    ) -> Result<Option<Notification>> {
        self.notifications
            .update_status(id, status, acknowledged_by)
            .await
    }
}
