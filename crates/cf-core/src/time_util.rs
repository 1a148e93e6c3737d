//! Time utilities.
//!
//! Snapshot envelopes and durable rows carry wall-clock UTC timestamps; the
//! scheduler uses monotonic `tokio::time` instead.

use chrono::{DateTime, SecondsFormat, Utc};

/// Current UTC time.
#[inline]
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp as ISO-8601 with a `Z` suffix and microsecond precision,
/// e.g. `2025-01-01T12:00:00.123456Z`.
pub fn to_iso8601(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time as **milliseconds** since Unix epoch.
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
