// ABOUTME: Reversible mapping between extraction timestamps and snapshot file names
// ABOUTME: Escapes the colons of RFC 3339 so names stay valid on every filesystem

use chrono::{DateTime, SecondsFormat, Utc};

/// Render an extraction timestamp as a snapshot file name.
///
/// Colons are illegal in file names on some platforms, so they become
/// underscores. The escaped form preserves lexicographic ordering, which keeps
/// a plain directory sort chronological.
pub fn snapshot_file_name(timestamp: DateTime<Utc>) -> String {
    let iso = timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
    format!("{}.json", iso.replace(':', "_"))
}

/// Parse a snapshot file name back into its extraction timestamp.
///
/// Returns `None` for anything that is not an escaped RFC 3339 name with a
/// `.json` suffix; discovery skips those entries silently (the watermark log
/// lives in the same directory).
pub fn parse_snapshot_file_name(name: &str) -> Option<DateTime<Utc>> {
    let stem = name.strip_suffix(".json")?;
    let iso = stem.replace('_', ":");
    DateTime::parse_from_rfc3339(&iso)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_name_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let name = snapshot_file_name(ts);
        assert_eq!(name, "2024-01-15T10_30_00.000Z.json");
        assert_eq!(parse_snapshot_file_name(&name), Some(ts));
    }

    #[test]
    fn test_rejects_malformed_names() {
        assert_eq!(parse_snapshot_file_name("latestSnapshotInjected.log"), None);
        assert_eq!(parse_snapshot_file_name("notes.json"), None);
        assert_eq!(parse_snapshot_file_name("2024-01-15T10_30_00.000Z"), None);
        assert_eq!(parse_snapshot_file_name(""), None);
    }

    #[test]
    fn test_escaped_names_sort_chronologically() {
        let earlier = Utc.with_ymd_and_hms(2024, 1, 15, 9, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        assert!(snapshot_file_name(earlier) < snapshot_file_name(later));
    }
}
