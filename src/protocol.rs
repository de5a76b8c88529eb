//! MT700 wire format.
//!
//! A record looks like
//!
//! ```text
//! #<device id>#<msg type>#<seq>#<mode>#<unused>#<voltage tenths>$<GPRMC sentence>
//! ```
//!
//! and arrives either as one `\r\n` terminated line or spread over several
//! lines closed by a `##` trailer line. [`FrameBuffer`] reassembles lines into
//! records and [`decode`] turns a record into a [`Reading`].

use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;
use tracing::debug;

use crate::models::{FixStatus, Reading};

/// Number of trailing characters of a `DDMM.mmmm` magnitude that hold minutes.
const MINUTES_WIDTH: usize = 7;

/// The GPRMC date is the 10th comma separated field (index 9).
const GPRMC_MIN_FIELDS: usize = 10;

const MIN_RECORD_FIELDS: usize = 7;

const RECORD_TRAILER: &str = "##";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("expected at least 7 '#'-separated fields, found {0}")]
    TooFewFields(usize),
    #[error("device id field is empty")]
    EmptyDeviceId,
    #[error("missing '$' between voltage and GPS record")]
    MissingGpsSeparator,
    #[error("GPS record has {0} fields, expected at least 10")]
    TruncatedGpsRecord(usize),
    #[error("voltage is not numeric: {0:?}")]
    InvalidVoltage(String),
    #[error("speed is not numeric: {0:?}")]
    InvalidSpeed(String),
    #[error("coordinate is not numeric: {0:?}")]
    InvalidCoordinate(String),
    #[error("malformed GPS date: {0:?}")]
    InvalidDate(String),
    #[error("malformed GPS time: {0:?}")]
    InvalidTime(String),
    #[error("record exceeds {0} bytes")]
    FrameTooLarge(usize),
    #[error("record is not valid UTF-8")]
    InvalidEncoding,
}

impl ProtocolError {
    /// Decoding stage that rejected the record, used as a log field.
    pub fn stage(&self) -> &'static str {
        match self {
            ProtocolError::FrameTooLarge(_) | ProtocolError::InvalidEncoding => "framing",
            ProtocolError::TooFewFields(_)
            | ProtocolError::EmptyDeviceId
            | ProtocolError::MissingGpsSeparator => "fields",
            ProtocolError::InvalidVoltage(_) => "voltage",
            ProtocolError::TruncatedGpsRecord(_)
            | ProtocolError::InvalidSpeed(_)
            | ProtocolError::InvalidCoordinate(_)
            | ProtocolError::InvalidDate(_)
            | ProtocolError::InvalidTime(_) => "gps",
        }
    }
}

/// Decode one record. Nothing is returned for a record that fails any stage.
pub fn decode(record: &str) -> Result<Reading, ProtocolError> {
    let parts: Vec<&str> = record.split('#').collect();
    if parts.len() < MIN_RECORD_FIELDS {
        return Err(ProtocolError::TooFewFields(parts.len()));
    }

    let device_id = parts[1].trim();
    if device_id.is_empty() {
        return Err(ProtocolError::EmptyDeviceId);
    }

    let (voltage, gprmc) = parts[6]
        .split_once('$')
        .ok_or(ProtocolError::MissingGpsSeparator)?;
    let voltage_raw = parse_number(voltage)
        .ok_or_else(|| ProtocolError::InvalidVoltage(voltage.to_string()))?;

    // A second '$' would start another sentence; only the first is consumed.
    let gprmc = gprmc.split('$').next().unwrap_or_default();
    let gps: Vec<&str> = gprmc.split(',').collect();
    if gps.len() < GPRMC_MIN_FIELDS {
        return Err(ProtocolError::TruncatedGpsRecord(gps.len()));
    }

    let gps_time = parse_gps_time(gps[1])?;
    let fix_status = FixStatus::from_code(gps[2]);
    let latitude = to_decimal_degrees(gps[3], or_default(gps[4], "N"))?;
    let longitude = to_decimal_degrees(gps[5], or_default(gps[6], "E"))?;
    let speed_knots = if gps[7].is_empty() {
        0.0
    } else {
        parse_number(gps[7]).ok_or_else(|| ProtocolError::InvalidSpeed(gps[7].to_string()))?
    };
    let gps_date = parse_gps_date(gps[9])?;

    Ok(Reading {
        device_id: device_id.to_string(),
        voltage_raw,
        fix_status,
        latitude,
        longitude,
        speed_knots,
        gps_date,
        gps_time,
    })
}

/// Convert an NMEA `DDMM.mmmm` / `DDDMM.mmmm` magnitude to signed decimal
/// degrees.
///
/// The last seven characters are always taken as minutes and everything in
/// front of them as degrees, wherever the decimal point sits.
pub fn to_decimal_degrees(magnitude: &str, hemisphere: &str) -> Result<f64, ProtocolError> {
    if magnitude.is_empty() {
        return Ok(0.0);
    }
    if !magnitude.is_ascii() {
        return Err(ProtocolError::InvalidCoordinate(magnitude.to_string()));
    }

    let split = magnitude.len().saturating_sub(MINUTES_WIDTH);
    let (degrees, minutes) = magnitude.split_at(split);
    let degrees = if degrees.is_empty() {
        0.0
    } else {
        parse_number(degrees)
            .ok_or_else(|| ProtocolError::InvalidCoordinate(magnitude.to_string()))?
    };
    let minutes = parse_number(minutes)
        .ok_or_else(|| ProtocolError::InvalidCoordinate(magnitude.to_string()))?;

    let decimal = degrees + minutes / 60.0;
    match hemisphere {
        "S" | "W" => Ok(-decimal),
        _ => Ok(decimal),
    }
}

/// `DDMMYY` → date in the 2000s.
fn parse_gps_date(raw: &str) -> Result<Option<NaiveDate>, ProtocolError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let invalid = || ProtocolError::InvalidDate(raw.to_string());
    let digits = leading_digits(raw, 6).ok_or_else(invalid)?;
    let day = two_digits(&digits[0..2]);
    let month = two_digits(&digits[2..4]);
    let year = 2000 + two_digits(&digits[4..6]) as i32;
    NaiveDate::from_ymd_opt(year, month, day)
        .map(Some)
        .ok_or_else(invalid)
}

/// `HHMMSS[.ss]` → time of day, fractional seconds dropped.
fn parse_gps_time(raw: &str) -> Result<Option<NaiveTime>, ProtocolError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let invalid = || ProtocolError::InvalidTime(raw.to_string());
    let digits = leading_digits(raw, 6).ok_or_else(invalid)?;
    NaiveTime::from_hms_opt(
        two_digits(&digits[0..2]),
        two_digits(&digits[2..4]),
        two_digits(&digits[4..6]),
    )
    .map(Some)
    .ok_or_else(invalid)
}

fn leading_digits(raw: &str, count: usize) -> Option<&str> {
    let head = raw.get(..count)?;
    head.bytes().all(|b| b.is_ascii_digit()).then_some(head)
}

fn two_digits(s: &str) -> u32 {
    s.bytes().fold(0, |acc, b| acc * 10 + u32::from(b - b'0'))
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}

/// Reassembles `\n` terminated lines into complete records.
///
/// Most devices send one record per line, and a line that decodes on its own
/// (or together with the lines buffered before it) completes a record. Some
/// spread a record over several lines closed by a `##` trailer line; a line
/// ending in the trailer always completes whatever is pending. Blank lines and
/// a bare trailer after an already completed record are ignored.
#[derive(Debug)]
pub struct FrameBuffer {
    pending: Vec<u8>,
    max_bytes: usize,
    /// Set after an overflow until the rest of the oversized line is read.
    skipping: bool,
}

impl FrameBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_bytes,
            skipping: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.iter().all(|b| b.is_ascii_whitespace())
    }

    /// Add one line (with or without its terminator). Returns the record when
    /// this line completes it.
    pub fn push_line(&mut self, line: &[u8]) -> Option<Result<String, ProtocolError>> {
        if self.skipping {
            self.skipping = !line.ends_with(b"\n");
            return None;
        }

        let content = trim_trailing_whitespace(line);
        if self.is_empty() {
            self.pending.clear();
            if content.is_empty() || content == RECORD_TRAILER.as_bytes() {
                return None;
            }
        }

        self.pending.extend_from_slice(line);
        if self.pending.len() > self.max_bytes {
            self.pending.clear();
            self.skipping = !line.ends_with(b"\n");
            return Some(Err(ProtocolError::FrameTooLarge(self.max_bytes)));
        }

        if content.ends_with(RECORD_TRAILER.as_bytes()) || decodes(&self.pending) {
            return Some(self.take());
        }

        // A complete record behind a stale fragment: keep the record.
        if self.pending.len() > line.len() && decodes(line) {
            debug!(
                discarded_bytes = self.pending.len() - line.len(),
                "dropping incomplete record fragment"
            );
            self.pending.clear();
            self.pending.extend_from_slice(line);
            return Some(self.take());
        }
        None
    }

    /// Flush whatever is pending, used when the peer closes mid-record.
    pub fn finish(&mut self) -> Option<Result<String, ProtocolError>> {
        self.skipping = false;
        if self.is_empty() {
            self.pending.clear();
            return None;
        }
        Some(self.take())
    }

    fn take(&mut self) -> Result<String, ProtocolError> {
        let bytes = std::mem::take(&mut self.pending);
        let text = String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidEncoding)?;
        Ok(text.trim_end().to_string())
    }
}

fn trim_trailing_whitespace(bytes: &[u8]) -> &[u8] {
    let len = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    &bytes[..len]
}

fn decodes(bytes: &[u8]) -> bool {
    std::str::from_utf8(bytes).map_or(false, |text| decode(text.trim_end()).is_ok())
}
