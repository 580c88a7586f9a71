//! Duration arithmetic shared by every timer component.
//!
//! All math is done on epoch milliseconds; `DateTime` only appears at the edges.
//! Durations are whole seconds everywhere in this crate.

use crate::error::ValidationError;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

/// Formats accepted for user-typed local datetimes (HTML `datetime-local` and friends)
const LOCAL_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
];

/// Whole seconds between two epoch-millisecond instants, floored, never negative.
pub fn elapsed_seconds_ms(start_ms: i64, end_ms: i64) -> u64 {
    let diff = end_ms.saturating_sub(start_ms);
    if diff <= 0 {
        return 0;
    }
    (diff / 1000) as u64
}

pub fn elapsed_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    elapsed_seconds_ms(start.timestamp_millis(), end.timestamp_millis())
}

/// `HH:MM:SS`; hours are not wrapped at 24.
pub fn format_hms(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

/// Parse an ISO-8601 timestamp coming from the API.
/// Offset-less values are taken as UTC.
pub fn parse_server_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Parse a user-entered datetime. Offset-less input is local wall-clock time.
pub fn parse_local_datetime(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| ValidationError::InvalidTimestamp(raw.to_string()))?;

    // DST gap has no local mapping; on overlap take the earlier instant
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| ValidationError::InvalidTimestamp(raw.to_string()))
}

/// Final duration of a stopped/created entry.
///
/// The server value wins when it is positive. A zero or missing value is recomputed from the
/// timestamps when both parse; otherwise `None`.
pub fn normalize_duration(
    duration: Option<i64>,
    start_time: Option<&str>,
    end_time: Option<&str>,
) -> Option<u64> {
    if let Some(d) = duration {
        if d > 0 {
            return Some(d as u64);
        }
    }
    let start = start_time.and_then(parse_server_timestamp)?;
    let end = end_time.and_then(parse_server_timestamp)?;
    Some(elapsed_seconds(start, end))
}
