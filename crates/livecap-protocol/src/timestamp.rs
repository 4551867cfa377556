//! Provider timestamp normalization.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Integers above this are millisecond timestamps; at or below, seconds.
pub const MILLIS_THRESHOLD: i64 = 10_000_000_000;

/// Interpret a provider timestamp, falling back to the current time.
///
/// Accepts JSON integers and numeric strings. Missing, non-numeric, and out-of-range values
/// yield `Utc::now()`.
pub fn normalize_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    value
        .and_then(as_integer)
        .and_then(from_epoch)
        .unwrap_or_else(Utc::now)
}

/// Convert an epoch integer using the seconds/milliseconds heuristic.
pub fn from_epoch(n: i64) -> Option<DateTime<Utc>> {
    if n > MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(n).single()
    } else {
        Utc.timestamp_opt(n, 0).single()
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn is_recent(ts: DateTime<Utc>) -> bool {
        (Utc::now() - ts).num_seconds().abs() < 5
    }

    #[test]
    fn seconds_and_millis_agree() {
        let secs = normalize_timestamp(Some(&json!(1_700_000_000)));
        let millis = normalize_timestamp(Some(&json!(1_700_000_000_000_i64)));
        assert_eq!(secs, millis);
        assert_eq!(secs.timestamp(), 1_700_000_000);
    }

    #[test]
    fn numeric_string_is_accepted() {
        let ts = normalize_timestamp(Some(&json!("1700000000000")));
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn threshold_is_exclusive() {
        let ts = from_epoch(MILLIS_THRESHOLD).unwrap();
        assert_eq!(ts.timestamp(), MILLIS_THRESHOLD);
    }

    #[test]
    fn missing_or_garbage_falls_back_to_now() {
        assert!(is_recent(normalize_timestamp(None)));
        assert!(is_recent(normalize_timestamp(Some(&json!("yesterday")))));
        assert!(is_recent(normalize_timestamp(Some(&json!(null)))));
        assert!(is_recent(normalize_timestamp(Some(&json!(1.5)))));
    }

    #[test]
    fn out_of_range_falls_back_to_now() {
        assert!(is_recent(normalize_timestamp(Some(&json!(i64::MAX)))));
        assert!(is_recent(normalize_timestamp(Some(&json!(u64::MAX)))));
    }
}
