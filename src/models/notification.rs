use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;
use crate::models::{NotificationId, ReadingId};
use crate::thresholds::BatteryLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    LowBattery,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::LowBattery => "low_battery",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low_battery" => Ok(NotificationType::LowBattery),
            other => Err(AppError::Storage(format!(
                "unknown notification type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Acknowledged,
    Sent,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Acknowledged => "acknowledged",
            NotificationStatus::Sent => "sent",
        }
    }

    /// Pending and sent notifications still count for deduplication.
    pub fn is_active(&self) -> bool {
        matches!(self, NotificationStatus::Pending | NotificationStatus::Sent)
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NotificationStatus::Pending),
            "acknowledged" => Ok(NotificationStatus::Acknowledged),
            "sent" => Ok(NotificationStatus::Sent),
            other => Err(AppError::Storage(format!(
                "unknown notification status: {}",
                other
            ))),
        }
    }
}

/// A stored notification.
///
/// `voltage` and `battery_level` are empty on rows written before they were
/// stored as columns; for those the level is recovered from `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub device_id: String,
    pub notification_type: NotificationType,
    pub status: NotificationStatus,
    pub message: String,
    pub voltage: Option<f64>,
    pub battery_level: Option<BatteryLevel>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub asset_data_id: Option<ReadingId>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<i64>,
}

/// Insert shape produced by the threshold evaluator. Always starts `pending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub device_id: String,
    pub notification_type: NotificationType,
    pub message: String,
    /// Battery voltage in volts.
    pub voltage: f64,
    pub battery_level: BatteryLevel,
    pub asset_data_id: Option<ReadingId>,
}
