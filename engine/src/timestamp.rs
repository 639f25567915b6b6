//! Sync timestamps and date ordering.
//!
//! The document-level `lastSync` marker is an ISO-8601 string with fixed-width
//! fields, so ordering it lexicographically is the same as ordering it in time.
//! Entry-level dates (`lastAttempt`, `uploadedAt`) come from feature code and
//! are less disciplined, so they are parsed when possible.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Fixed-width UTC format with millisecond precision, e.g. `2024-03-01T10:00:00.000Z`.
const SYNC_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// The `lastSync` marker of an aggregate snapshot.
///
/// Ordering is lexicographic on the underlying string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncTimestamp(String);

impl SyncTimestamp {
    /// Wrap an already formatted timestamp.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Format a UTC instant in the fixed-width sync format.
    pub fn from_datetime(instant: DateTime<Utc>) -> Self {
        Self(instant.format(SYNC_TIMESTAMP_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Whether this timestamp is strictly newer than `recorded`.
    ///
    /// An absent recorded timestamp is always older.
    pub fn is_newer_than(&self, recorded: Option<&SyncTimestamp>) -> bool {
        match recorded {
            None => true,
            Some(recorded) => self > recorded,
        }
    }
}

impl std::fmt::Display for SyncTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SyncTimestamp {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SyncTimestamp {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Parse a loosely formatted date into a UTC instant.
///
/// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS[.fff]`, or a bare `YYYY-MM-DD`.
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Compare two entry dates.
///
/// Both sides are compared as instants when both parse, otherwise as strings.
pub fn compare_dates(a: &str, b: &str) -> Ordering {
    match (parse_instant(a), parse_instant(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// Pick the later of two optional entry dates.
///
/// A present date beats an absent one; on a tie the first argument is kept.
pub fn later_of<'a>(a: Option<&'a str>, b: Option<&'a str>) -> Option<&'a str> {
    match (a, b) {
        (Some(a), Some(b)) => {
            if compare_dates(b, a) == Ordering::Greater {
                Some(b)
            } else {
                Some(a)
            }
        }
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_width_format() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap();
        let ts = SyncTimestamp::from_datetime(instant);
        assert_eq!(ts.as_str(), "2024-03-01T09:05:07.000Z");
    }

    #[test]
    fn ordering_is_lexicographic() {
        let older = SyncTimestamp::new("2024-01-01T00:00:00.000Z");
        let newer = SyncTimestamp::new("2024-01-02T00:00:00.000Z");
        assert!(older < newer);
        assert!(newer.is_newer_than(Some(&older)));
        assert!(!older.is_newer_than(Some(&newer)));
    }

    #[test]
    fn equal_is_not_newer() {
        let ts = SyncTimestamp::new("2024-01-01T00:00:00.000Z");
        assert!(!ts.is_newer_than(Some(&ts.clone())));
    }

    #[test]
    fn absent_recorded_is_older() {
        let ts = SyncTimestamp::new("2000-01-01T00:00:00.000Z");
        assert!(ts.is_newer_than(None));
    }

    #[test]
    fn parses_supported_formats() {
        assert!(parse_instant("2024-02-01").is_some());
        assert!(parse_instant("2024-02-01T10:00:00Z").is_some());
        assert!(parse_instant("2024-02-01T10:00:00.123+02:00").is_some());
        assert!(parse_instant("2024-02-01T10:00:00.5").is_some());
        assert!(parse_instant("last tuesday").is_none());
    }

    #[test]
    fn compare_dates_across_formats() {
        // Same instant in two notations
        assert_eq!(
            compare_dates("2024-02-01", "2024-02-01T00:00:00.000Z"),
            Ordering::Equal
        );
        // Offset makes the lexicographically smaller string the later instant
        assert_eq!(
            compare_dates("2024-02-01T01:00:00+02:00", "2024-01-31T23:30:00Z"),
            Ordering::Less
        );
    }

    #[test]
    fn later_of_prefers_present_and_keeps_first_on_tie() {
        assert_eq!(later_of(Some("2024-01-01"), None), Some("2024-01-01"));
        assert_eq!(later_of(None, Some("2024-01-01")), Some("2024-01-01"));
        assert_eq!(
            later_of(Some("2024-01-01"), Some("2024-02-01")),
            Some("2024-02-01")
        );
        assert_eq!(
            later_of(Some("2024-02-01"), Some("2024-02-01T00:00:00Z")),
            Some("2024-02-01")
        );
        assert_eq!(later_of(None, None), None);
    }

    #[test]
    fn serializes_as_plain_string() {
        let ts = SyncTimestamp::new("2024-01-01T00:00:00.000Z");
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2024-01-01T00:00:00.000Z\"");
    }
}
