use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::debug;

/// Parse the date formats registries commonly emit. RFC 3339 is tried first.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let date_str = date_str.trim();
    if date_str.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(date_str) {
        return Some(dt.with_timezone(&Utc));
    }

    let zoned_formats = [
        "%Y-%m-%dT%H:%M:%S%.f%z", // 2025-05-18T13:36:06.0+0000
        "%Y-%m-%dT%H:%M:%S%z",    // 2025-05-18T13:36:06+0000
        "%Y-%m-%d %H:%M:%S%z",    // 2025-05-18 13:36:06+0000
    ];

    for format in &zoned_formats {
        if let Ok(dt) = DateTime::parse_from_str(date_str, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    let naive_formats = [
        "%Y-%m-%dT%H:%M:%S%.fZ", // 2025-05-18T13:36:06.0Z
        "%Y-%m-%dT%H:%M:%SZ",    // 2025-05-18T13:36:06Z
        "%Y-%m-%dT%H:%M:%S",     // 2025-05-18T13:36:06
        "%Y-%m-%d %H:%M:%S",     // 2025-05-18 13:36:06
        "%Y.%m.%d %H:%M:%S",     // 2025.05.18 13:36:06
    ];

    for format in &naive_formats {
        if let Ok(naive_dt) = NaiveDateTime::parse_from_str(date_str, format) {
            return Some(naive_dt.and_utc());
        }
    }

    let date_only_formats = [
        "%Y-%m-%d",
        "%d-%b-%Y",
        "%d %b %Y",
        "%Y/%m/%d",
        "%Y.%m.%d",
        "%d.%m.%Y",
        "%Y%m%d",
    ];

    for format in &date_only_formats {
        if let Ok(naive_date) = NaiveDate::parse_from_str(date_str, format) {
            if let Some(naive_dt) = naive_date.and_hms_opt(0, 0, 0) {
                return Some(naive_dt.and_utc());
            }
        }
    }

    debug!("Failed to parse date: {}", date_str);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rfc3339() {
        assert_eq!(
            parse_date("1997-09-15T04:00:00Z"),
            Some(Utc.with_ymd_and_hms(1997, 9, 15, 4, 0, 0).unwrap())
        );
        assert_eq!(
            parse_date("2024-08-14T07:01:34+02:00"),
            Some(Utc.with_ymd_and_hms(2024, 8, 14, 5, 1, 34).unwrap())
        );
    }

    #[test]
    fn test_registry_formats() {
        let midnight = Utc.with_ymd_and_hms(2025, 5, 18, 0, 0, 0).unwrap();
        assert_eq!(parse_date("2025-05-18"), Some(midnight));
        assert_eq!(parse_date("18-May-2025"), Some(midnight));
        assert_eq!(parse_date("2025/05/18"), Some(midnight));
        assert_eq!(parse_date("18.05.2025"), Some(midnight));
        assert_eq!(
            parse_date("2025-05-18 13:36:06"),
            Some(Utc.with_ymd_and_hms(2025, 5, 18, 13, 36, 6).unwrap())
        );
    }

    #[test]
    fn test_unparsable() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("before 1995"), None);
    }
}
