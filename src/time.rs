//! Timestamp formatting.
//!
//! Documents carry times as float seconds since the Unix epoch. Container
//! fields store them as ISO-8601 text in the local timezone, with the UTC
//! offset and microseconds when the fraction is non-zero
//! (`2024-05-01T14:03:07.250000+02:00`).

use chrono::{DateTime, Local, TimeZone};

/// Byte width of the longest rendering, `YYYY-MM-DDTHH:MM:SS.ffffff+HH:MM`.
///
/// Time columns are created with this width so whole-second stamps written
/// first do not truncate fractional ones written later.
pub const ISO8601_WIDTH: usize = 32;

/// Render a Unix timestamp as local ISO-8601 text.
///
/// Non-finite or out-of-range input renders as `"None"`, like an absent time.
pub fn iso8601(timestamp: f64) -> String {
    match to_local(timestamp) {
        Some(dt) if dt.timestamp_subsec_micros() != 0 => {
            dt.format("%Y-%m-%dT%H:%M:%S%.6f%:z").to_string()
        }
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
        None => "None".to_string(),
    }
}

/// Convert a Unix timestamp to a local date-time, rounded to microseconds.
pub fn to_local(timestamp: f64) -> Option<DateTime<Local>> {
    if !timestamp.is_finite() {
        return None;
    }
    let micros = (timestamp * 1e6).round();
    if micros.abs() > i64::MAX as f64 {
        return None;
    }
    Local.timestamp_micros(micros as i64).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn whole_seconds_have_no_fraction() {
        let text = iso8601(1000.0);
        assert!(!text.contains('.'), "{text}");
        let parsed = DateTime::parse_from_rfc3339(&text).unwrap();
        assert_eq!(parsed.with_timezone(&Utc).timestamp(), 1000);
    }

    #[test]
    fn fractions_use_microseconds() {
        let text = iso8601(1000.5);
        assert!(text.contains(".500000"), "{text}");
        let parsed = DateTime::parse_from_rfc3339(&text).unwrap();
        assert_eq!(parsed.timestamp_subsec_micros(), 500_000);
        assert!(text.len() <= ISO8601_WIDTH);
    }

    #[test]
    fn non_finite_is_none() {
        assert_eq!(iso8601(f64::NAN), "None");
    }
}
