//! Timestamp helpers for the database layer.
//!
//! Timestamps are stored as `INTEGER` Unix epoch milliseconds (UTC).

use chrono::{DateTime, TimeZone, Utc};

/// Current time as Unix epoch milliseconds (UTC).
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[inline]
pub fn datetime_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Convert Unix epoch milliseconds to `DateTime<Utc>`.
///
/// Out-of-range values clamp to the nearest representable timestamp.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    match Utc.timestamp_millis_opt(ms) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None if ms.is_negative() => DateTime::<Utc>::MIN_UTC,
        chrono::LocalResult::None => DateTime::<Utc>::MAX_UTC,
    }
}

/// Epoch milliseconds `days` before now.
pub fn days_ago_ms(days: u32) -> i64 {
    datetime_to_ms(Utc::now() - chrono::Duration::days(i64::from(days)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_round_trip() {
        let dt = Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap();
        assert_eq!(ms_to_datetime(datetime_to_ms(dt)), dt);
    }

    #[test]
    fn test_ms_to_datetime_clamps() {
        assert_eq!(ms_to_datetime(i64::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(ms_to_datetime(i64::MIN), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_days_ago_is_in_the_past() {
        let cutoff = days_ago_ms(30);
        let diff = now_ms() - cutoff;
        assert!(diff >= 30 * 24 * 60 * 60 * 1000);
    }
}
