use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validity of the GPS position carried by a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    ValidPosition,
    LastKnownPosition,
    InvalidPosition,
}

impl FixStatus {
    /// Map the GPRMC status code. Anything that is not `A` or `L` is treated
    /// as an invalid fix, including the standard `V`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "A" => FixStatus::ValidPosition,
            "L" => FixStatus::LastKnownPosition,
            _ => FixStatus::InvalidPosition,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FixStatus::ValidPosition => "valid_position",
            FixStatus::LastKnownPosition => "last_known_position",
            FixStatus::InvalidPosition => "invalid_position",
        }
    }
}

impl fmt::Display for FixStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded telemetry sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub device_id: String,
    /// Battery voltage in tenths of a volt as sent by the device (`36` = 3.6 V).
    pub voltage_raw: f64,
    pub fix_status: FixStatus,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_knots: f64,
    pub gps_date: Option<NaiveDate>,
    pub gps_time: Option<NaiveTime>,
}

impl Reading {
    pub fn voltage_volts(&self) -> f64 {
        self.voltage_raw / 10.0
    }
}
