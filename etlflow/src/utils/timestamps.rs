//! Timestamp helpers for events, snapshot names and partition columns.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Format used for snapshot object names (`raw_data_%Y%m%d_%H%M%S.csv`).
pub const SNAPSHOT_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Returns the current UTC time as an ISO 8601 formatted string.
///
/// ```
/// use etlflow::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Formats a time as a snapshot suffix, e.g. `20240309_070501`.
#[must_use]
pub fn snapshot_stamp(at: Timestamp) -> String {
    at.format(SNAPSHOT_STAMP_FORMAT).to_string()
}

/// Parses a partition source date.
///
/// Accepts `YYYY-MM-DD`, and RFC 3339 or `YYYY-MM-DD HH:MM:SS` timestamps
/// (only the date part is kept). Returns `None` for anything else.
#[must_use]
pub fn parse_partition_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.date_naive());
    }
    chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.date())
}

/// Year and month partition values for a date.
#[must_use]
pub fn year_month(date: NaiveDate) -> (i32, u32) {
    (date.year(), date.month())
}

/// Elapsed milliseconds between two timestamps, never negative.
#[must_use]
pub fn elapsed_ms(start: Timestamp, end: Timestamp) -> f64 {
    let micros = (end - start).num_microseconds().unwrap_or(0).max(0);
    micros as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_snapshot_stamp_format() {
        let at = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 58).unwrap();
        assert_eq!(snapshot_stamp(at), "20231231_235958");
    }

    #[test]
    fn test_parse_partition_date_variants() {
        let expected = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(parse_partition_date("2024-02-29"), Some(expected));
        assert_eq!(parse_partition_date("2024-02-29T10:00:00Z"), Some(expected));
        assert_eq!(parse_partition_date(" 2024-02-29 10:00:00 "), Some(expected));
        assert_eq!(parse_partition_date("2023-02-29"), None);
        assert_eq!(parse_partition_date("not a date"), None);
        assert_eq!(parse_partition_date(""), None);
    }

    #[test]
    fn test_year_month() {
        let date = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        assert_eq!(year_month(date), (2024, 7));
    }

    #[test]
    fn test_elapsed_ms_never_negative() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!((elapsed_ms(b, a) - 1000.0).abs() < f64::EPSILON);
        assert!(elapsed_ms(a, b).abs() < f64::EPSILON);
    }
}
