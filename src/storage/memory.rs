use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::{
    NewNotification, Notification, NotificationId, NotificationStatus, NotificationType, Reading,
    ReadingId,
};
use crate::storage::Storage;

#[derive(Debug, Default)]
struct Tables {
    devices: HashSet<String>,
    readings: Vec<(ReadingId, Reading)>,
    notifications: Vec<Notification>,
}

/// In-process storage used by tests and when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn readings(&self) -> Vec<(ReadingId, Reading)> {
        self.tables.lock().await.readings.clone()
    }

    pub async fn readings_for_device(&self, device_id: &str) -> Vec<Reading> {
        self.tables
            .lock()
            .await
            .readings
            .iter()
            .filter(|(_, r)| r.device_id == device_id)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub async fn devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.tables.lock().await.devices.iter().cloned().collect();
        devices.sort();
        devices
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_reading(&self, reading: &Reading) -> Result<ReadingId> {
        let mut tables = self.tables.lock().await;
        tables.devices.insert(reading.device_id.clone());
        let id = tables.readings.len() as ReadingId + 1;
        tables.readings.push((id, reading.clone()));
        Ok(id)
    }

    async fn latest_active_notification(
        &self,
        device_id: &str,
        kind: NotificationType,
    ) -> Result<Option<Notification>> {
        let tables = self.tables.lock().await;
        // Ids grow with insertion order, so the last match is the newest.
        Ok(tables
            .notifications
            .iter()
            .rev()
            .find(|n| {
                n.device_id == device_id && n.notification_type == kind && n.status.is_active()
            })
            .cloned())
    }

    async fn save_notification(&self, notification: &NewNotification) -> Result<Notification> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let stored = Notification {
            id: tables.notifications.len() as NotificationId + 1,
            device_id: notification.device_id.clone(),
            notification_type: notification.notification_type,
            status: NotificationStatus::Pending,
            message: notification.message.clone(),
            voltage: Some(notification.voltage),
            battery_level: Some(notification.battery_level),
            created_at: now,
            updated_at: now,
            asset_data_id: notification.asset_data_id,
            acknowledged_at: None,
            acknowledged_by: None,
        };
        tables.notifications.push(stored.clone());
        Ok(stored)
    }

    async fn notifications_for_device(&self, device_id: &str) -> Result<Vec<Notification>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .notifications
            .iter()
            .rev()
            .filter(|n| n.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn update_notification_status(
        &self,
        id: NotificationId,
        status: NotificationStatus,
        acknowledged_by: Option<i64>,
    ) -> Result<Option<Notification>> {
        let mut tables = self.tables.lock().await;
        let Some(n) = tables.notifications.iter_mut().find(|n| n.id == id) else {
            return Ok(None);
        };
        let now = Utc::now();
        n.status = status;
        n.updated_at = now;
        if acknowledged_by.is_some() {
            n.acknowledged_by = acknowledged_by;
            n.acknowledged_at = Some(now);
        }
        Ok(Some(n.clone()))
    }
}
