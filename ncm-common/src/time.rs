//! Timestamp utilities

use chrono::{DateTime, NaiveDateTime, Utc};

/// Format used by saved capture files (`2025-03-01 14:22:05`)
pub const CAPTURE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Milliseconds elapsed from `since` to `now` (negative if `since` is later)
pub fn elapsed_ms(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_milliseconds()
}

/// Parse a capture file timestamp, treating it as UTC
///
/// RFC 3339 strings are accepted as well.
pub fn parse_capture_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, CAPTURE_TIMESTAMP_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
