//! Battery thresholds and low-battery notification decisions.
//!
//! Voltages are bucketed into a [`BatteryLevel`]. A device gets a new
//! `low_battery` notification only when its level differs from the level of
//! its latest active notification; the `Normal` level never notifies.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::{NewNotification, Notification, NotificationType};
use crate::storage::Storage;

/// Battery severity, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryLevel {
    Critical,
    Low,
    Medium,
    Normal,
}

impl BatteryLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatteryLevel::Critical => "critical",
            BatteryLevel::Low => "low",
            BatteryLevel::Medium => "medium",
            BatteryLevel::Normal => "normal",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            BatteryLevel::Critical => "Critical",
            BatteryLevel::Low => "Low",
            BatteryLevel::Medium => "Medium",
            BatteryLevel::Normal => "Normal",
        }
    }
}

impl fmt::Display for BatteryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatteryLevel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(BatteryLevel::Critical),
            "low" => Ok(BatteryLevel::Low),
            "medium" => Ok(BatteryLevel::Medium),
            "normal" => Ok(BatteryLevel::Normal),
            other => Err(AppError::Storage(format!("unknown battery level: {}", other))),
        }
    }
}

/// Voltage boundaries in volts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// At or below this voltage the battery is critical.
    #[serde(default = "default_critical_max_v")]
    pub critical_max_v: f64,
    /// Below this voltage the battery is low.
    #[serde(default = "default_low_below_v")]
    pub low_below_v: f64,
    /// Below this voltage the battery is medium; anything above is normal.
    #[serde(default = "default_medium_below_v")]
    pub medium_below_v: f64,
}

fn default_critical_max_v() -> f64 {
    3.3
}
fn default_low_below_v() -> f64 {
    3.5
}
fn default_medium_below_v() -> f64 {
    3.7
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            critical_max_v: default_critical_max_v(),
            low_below_v: default_low_below_v(),
            medium_below_v: default_medium_below_v(),
        }
    }
}

impl ThresholdConfig {
    pub fn level_for_volts(&self, volts: f64) -> BatteryLevel {
        if volts <= self.critical_max_v {
            BatteryLevel::Critical
        } else if volts < self.low_below_v {
            BatteryLevel::Low
        } else if volts < self.medium_below_v {
            BatteryLevel::Medium
        } else {
            BatteryLevel::Normal
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.critical_max_v < self.low_below_v && self.low_below_v < self.medium_below_v) {
            return Err(AppError::Config(format!(
                "thresholds must increase: critical_max_v {} < low_below_v {} < medium_below_v {}",
                self.critical_max_v, self.low_below_v, self.medium_below_v
            )));
        }
        Ok(())
    }
}

/// Text of a low-battery notification. The `(<volts>V)` part is read back by
/// [`volts_from_message`] for rows that predate the `voltage` column.
pub fn notification_message(level: BatteryLevel, volts: f64) -> String {
    format!("{} battery level ({:.2}V)", level.label(), volts)
}

/// Recover the voltage embedded in a notification message.
pub fn volts_from_message(message: &str) -> Option<f64> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN
        .get_or_init(|| Regex::new(r"\((\d+(?:\.\d+)?)V\)").expect("valid voltage pattern"));
    re.captures(message)?.get(1)?.as_str().parse().ok()
}

#[derive(Debug, Clone, Default)]
pub struct ThresholdEvaluator {
    config: ThresholdConfig,
}

impl ThresholdEvaluator {
    pub fn new(config: ThresholdConfig) -> Self {
        Self { config }
    }

    /// Level implied by a raw (tenths of a volt) reading.
    pub fn level_for_raw(&self, voltage_raw: f64) -> BatteryLevel {
        self.config.level_for_volts(voltage_raw / 10.0)
    }

    /// Level recorded by an earlier notification, or `None` when it can not
    /// be recovered.
    pub fn previous_level(&self, notification: &Notification) -> Option<BatteryLevel> {
        if let Some(level) = notification.battery_level {
            return Some(level);
        }
        if let Some(volts) = notification.voltage {
            return Some(self.config.level_for_volts(volts));
        }
        volts_from_message(&notification.message).map(|v| self.config.level_for_volts(v))
    }

    /// Decide against an already fetched latest active notification.
    pub fn decide(
        &self,
        device_id: &str,
        voltage_raw: f64,
        previous: Option<&Notification>,
    ) -> Option<NewNotification> {
        let level = self.level_for_raw(voltage_raw);
        if level == BatteryLevel::Normal {
            return None;
        }

        if let Some(previous) = previous {
            match self.previous_level(previous) {
                Some(old) if old == level => {
                    debug!(device_id = %device_id, level = %level, "battery level unchanged");
                    return None;
                }
                Some(_) => {}
                None => {
                    warn!(
                        device_id = %device_id,
                        notification_id = previous.id,
                        "could not recover level of previous notification; notifying"
                    );
                }
            }
        }

        let volts = voltage_raw / 10.0;
        Some(NewNotification {
            device_id: device_id.to_string(),
            notification_type: NotificationType::LowBattery,
            message: notification_message(level, volts),
            voltage: volts,
            battery_level: level,
            asset_data_id: None,
        })
    }

    /// Look up the device's latest active battery notification and decide.
    ///
    /// A failed lookup is treated as "no previous notification" so a real
    /// battery event is never dropped.
    pub async fn evaluate(
        &self,
        storage: &dyn Storage,
        device_id: &str,
        voltage_raw: f64,
    ) -> Option<NewNotification> {
        if self.level_for_raw(voltage_raw) == BatteryLevel::Normal {
            return None;
        }

        let previous = match storage
            .latest_active_notification(device_id, NotificationType::LowBattery)
            .await
        {
            Ok(previous) => previous,
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "notification lookup failed; notifying");
                None
            }
        };
        self.decide(device_id, voltage_raw, previous.as_ref())
    }
}
