use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::db::DbPool;
use crate::error::{AppError, Result};
use crate::models::{
    NewNotification, Notification, NotificationId, NotificationStatus, NotificationType,
};
use crate::thresholds::BatteryLevel;

#[derive(Debug, Clone, FromRow)]
struct NotificationRow {
    notification_id: i64,
    device_id: String,
    #[sqlx(rename = "type")]
    notification_type: String,
    status: String,
    message: String,
    voltage: Option<f64>,
    battery_level: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    asset_data_id: Option<i64>,
    acknowledged_at: Option<DateTime<Utc>>,
    acknowledged_by: Option<i64>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = AppError;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Notification {
            id: row.notification_id,
            device_id: row.device_id,
            notification_type: row.notification_type.parse()?,
            status: row.status.parse()?,
            message: row.message,
            voltage: row.voltage,
            battery_level: row
                .battery_level
                .as_deref()
                .map(str::parse::<BatteryLevel>)
                .transpose()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            asset_data_id: row.asset_data_id,
            acknowledged_at: row.acknowledged_at,
            acknowledged_by: row.acknowledged_by,
        })
    }
}

const COLUMNS: &str = "notification_id, device_id, type, status, message, voltage, battery_level, \
     created_at, updated_at, asset_data_id, acknowledged_at, acknowledged_by";

#[derive(Debug, Clone)]
pub struct NotificationRepository {
    pool: DbPool,
}

impl NotificationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, notification: &NewNotification) -> Result<Notification> {
        let sql = format!(
            r#"
            INSERT INTO notifications (
                device_id,
                type,
                status,
                message,
                voltage,
                battery_level,
                asset_data_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(&notification.device_id)
            .bind(notification.notification_type.as_str())
            .bind(NotificationStatus::Pending.as_str())
            .bind(&notification.message)
            .bind(notification.voltage)
            .bind(notification.battery_level.as_str())
            .bind(notification.asset_data_id)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    pub async fn get_by_id(&self, id: NotificationId) -> Result<Option<Notification>> {
        let sql = format!("SELECT {COLUMNS} FROM notifications WHERE notification_id = $1");
        sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Notification::try_from)
            .transpose()
    }

    /// Newest notification of `kind` for the device that is still `pending`
    /// or `sent`.
    pub async fn latest_active(
        &self,
        device_id: &str,
        kind: NotificationType,
    ) -> Result<Option<Notification>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM notifications
            WHERE device_id = $1
              AND type = $2
              AND status IN ('pending', 'sent')
            ORDER BY created_at DESC, notification_id DESC
            LIMIT 1
            "#
        );
        sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(device_id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(Notification::try_from)
            .transpose()
    }

    pub async fn list_for_device(&self, device_id: &str) -> Result<Vec<Notification>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM notifications
            WHERE device_id = $1
            ORDER BY created_at DESC, notification_id DESC
            "#
        );
        sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(device_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Notification::try_from)
            .collect()
    }

    pub async fn update_status(
        &self,
        id: NotificationId,
        status: NotificationStatus,
        acknowledged_by: Option<i64>,
    ) -> Result<Option<Notification>> {
        let sql = format!(
            r#"
            UPDATE notifications
            SET status = $2,
                updated_at = NOW(),
                acknowledged_by = COALESCE($3, acknowledged_by),
                acknowledged_at = CASE WHEN $3 IS NULL THEN acknowledged_at ELSE NOW() END
            WHERE notification_id = $1
            RETURNING {COLUMNS}
            "#
        );
        sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(acknowledged_by)
            .fetch_optional(&self.pool)
            .await?
            .map(Notification::try_from)
            .transpose()
    }
}
