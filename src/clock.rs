//! Write timestamps
//!
//! Rows store timestamps as INTEGER epoch milliseconds. Every write takes its
//! timestamp from a process-wide clock that never repeats or goes backwards, so
//! `(updated_at, id)` orderings used for cursors grow strictly with each write.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::error::StorageError;

static LAST_MS: AtomicI64 = AtomicI64::new(0);

/// Wall-clock milliseconds, not adjusted for monotonicity
pub fn wall_clock_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Next write timestamp: `max(now, last + 1)`
pub fn next_write_ms() -> i64 {
    let now = wall_clock_ms();
    let mut last = LAST_MS.load(Ordering::Relaxed);
    loop {
        let next = if now > last { now } else { last + 1 };
        match LAST_MS.compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Raise the floor so timestamps stay ahead of rows already on disk.
pub fn observe_ms(persisted: i64) {
    LAST_MS.fetch_max(persisted, Ordering::SeqCst);
}

/// Format epoch millis as RFC 3339 with millisecond precision
pub fn format_ms(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => String::new(),
    }
}

/// serde `serialize_with` adapter for millisecond columns
pub fn serialize_ms<S: serde::Serializer>(ms: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_ms(*ms))
}

/// Parse an RFC 3339 timestamp into epoch millis
pub fn parse_rfc3339_ms(field: &str, value: &str) -> Result<i64, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
        .map_err(|_| StorageError::Validation(format!("{} must be an RFC 3339 timestamp", field)))
}
