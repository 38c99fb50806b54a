use chrono::{DateTime, SecondsFormat, Utc};

/// Unix timestamp of 0001-01-01T00:00:00Z, the zero instant overlay nodes report for "never"
const ZERO_TIME_UNIX_SECS: i64 = -62_135_596_800;

/// Check whether a timestamp is the zero instant
pub fn is_zero_time(ts: &DateTime<Utc>) -> bool {
    ts.timestamp() <= ZERO_TIME_UNIX_SECS
}

/// Render a timestamp as RFC3339 with second precision
///
/// Unset and zero-instant values become an empty string, never null.
pub fn format_timestamp(ts: Option<&DateTime<Utc>>) -> String {
    match ts {
        Some(ts) if !is_zero_time(ts) => ts.to_rfc3339_opts(SecondsFormat::Secs, true),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_timestamp_rfc3339() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 19, 20, 30, 0).unwrap();
        assert_eq!(format_timestamp(Some(&ts)), "2026-01-19T20:30:00Z");
    }

    #[test]
    fn test_format_timestamp_drops_subseconds() {
        let ts = DateTime::parse_from_rfc3339("2026-01-19T20:29:55.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(Some(&ts)), "2026-01-19T20:29:55Z");
    }

    #[test]
    fn test_format_timestamp_unset() {
        assert_eq!(format_timestamp(None), "");
    }

    #[test]
    fn test_format_timestamp_zero_instant() {
        let zero = DateTime::parse_from_rfc3339("0001-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(is_zero_time(&zero));
        assert_eq!(format_timestamp(Some(&zero)), "");
    }

    #[test]
    fn test_unix_epoch_is_not_zero() {
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        assert!(!is_zero_time(&epoch));
        assert_eq!(format_timestamp(Some(&epoch)), "1970-01-01T00:00:00Z");
    }
}
