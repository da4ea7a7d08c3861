//! Canonical timestamp format shared by SQL defaults, triggers and sync markers.
//!
//! Every timestamp written by this crate is RFC 3339 UTC with millisecond
//! precision and a `Z` suffix, so string comparison in SQL orders them
//! chronologically.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// SQL expression producing the current time in canonical form.
pub const SQL_NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

/// Current time as a canonical marker.
pub fn now() -> String {
    format(Utc::now())
}

pub fn format(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse any timestamp shape the local store or the remote store produces:
/// RFC 3339 with any offset, or SQLite's `YYYY-MM-DD HH:MM:SS[.fff]` (UTC).
pub fn parse(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    for pattern in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, pattern) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Re-emit a timestamp string in canonical form, or `None` if unparseable.
pub fn canonicalize(value: &str) -> Option<String> {
    parse(value).map(format)
}

/// Interpret a number as milliseconds since the epoch.
pub fn from_epoch_millis(millis: i64) -> Option<String> {
    Utc.timestamp_millis_opt(millis).single().map(format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_has_millis_and_z() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format(ts), "2024-01-02T03:04:05.000Z");
    }

    #[test]
    fn canonicalize_accepts_offsets_and_sqlite_format() {
        assert_eq!(
            canonicalize("2024-01-02T05:04:05.123456+02:00").as_deref(),
            Some("2024-01-02T03:04:05.123Z")
        );
        assert_eq!(
            canonicalize("2024-01-02 03:04:05").as_deref(),
            Some("2024-01-02T03:04:05.000Z")
        );
        assert_eq!(canonicalize("yesterday"), None);
    }

    #[test]
    fn sql_now_matches_rust_format() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let from_sql: String = conn
            .query_row(&format!("SELECT {SQL_NOW}"), [], |row| row.get(0))
            .unwrap();
        assert_eq!(from_sql.len(), now().len());
        assert_eq!(canonicalize(&from_sql).unwrap(), from_sql);
    }

    #[test]
    fn epoch_millis() {
        assert_eq!(
            from_epoch_millis(0).as_deref(),
            Some("1970-01-01T00:00:00.000Z")
        );
    }
}
