pub mod clock;
pub mod error;
pub mod http_client;

pub use clock::{Clock, SystemClock};
pub use error::{AppError, AppResult};

use chrono::{DateTime, Local, TimeZone, Utc};

/// Collector timestamp format, rendered in the terminal's local time zone.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp<Tz: TimeZone>(ts: &DateTime<Tz>) -> String {
    ts.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string()
}

/// Like [`format_timestamp`] but renders an absent timestamp as "Never".
pub fn format_last_sync(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => format_timestamp(&ts),
        None => "Never".to_string(),
    }
}

/// Parse an operator-supplied RFC 3339 timestamp.
pub fn parse_rfc3339(raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Custom(format!("invalid timestamp '{}': {}", raw.trim(), e)))
}

/// Convert epoch milliseconds to a UTC instant. `0` and out-of-range values
/// mean "never".
pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    if millis <= 0 {
        return None;
    }
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_millis_means_never() {
        assert_eq!(from_epoch_millis(0), None);
        assert_eq!(from_epoch_millis(-5), None);
        assert_eq!(format_last_sync(None), "Never");
    }

    #[test]
    fn rfc3339_offsets_normalise_to_utc() {
        let ts = parse_rfc3339(" 2024-06-01T10:00:00+02:00 ").unwrap();
        assert_eq!(ts, parse_rfc3339("2024-06-01T08:00:00Z").unwrap());
        assert!(parse_rfc3339("yesterday").is_err());
    }

    #[test]
    fn millis_round_trip_through_utc() {
        let ts = from_epoch_millis(1_700_000_000_123).unwrap();
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn timestamp_format_has_collector_shape() {
        let ts = from_epoch_millis(1_700_000_000_000).unwrap();
        let rendered = format_timestamp(&ts);
        assert_eq!(rendered.len(), "YYYY-MM-DD HH:MM:SS".len());
        assert_eq!(&rendered[4..5], "-");
        assert_eq!(&rendered[10..11], " ");
        assert_eq!(&rendered[13..14], ":");
    }
}
