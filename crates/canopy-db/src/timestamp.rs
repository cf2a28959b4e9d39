//! Timestamp encoding shared by every table.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings in UTC with
//! microsecond precision, so `ORDER BY` and `MAX()` on the text column agree
//! with chronological order.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::pool::{DbError, DbResult};

/// Encode a timestamp for storage.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decode a stored timestamp.
pub fn parse_timestamp(raw: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::InvalidData(format!("invalid stored timestamp '{}': {}", raw, e)))
}

/// Current time, already encoded.
pub fn now_timestamp() -> String {
    format_timestamp(&Utc::now())
}
