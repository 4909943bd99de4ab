//! Timestamp utilities

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Convert a unix timestamp in seconds (as reported by position sources)
/// into a UTC instant. Returns `None` for values chrono cannot represent.
pub fn from_unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Age of `then` relative to `now`, clamped at zero for clock skew
pub fn age(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    let age = now.signed_duration_since(then);
    if age < Duration::zero() {
        Duration::zero()
    } else {
        age
    }
}
