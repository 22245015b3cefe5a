//! Bookmark store and resume pointer
//!
//! State is persisted by the downstream consumer between runs and handed back
//! through `--state`. Watermarks only ever move forward: [`State::advance_bookmark`]
//! keeps whichever of the stored and candidate instants is later.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Sync state: per-stream watermarks plus the stream that was mid-sync
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub bookmarks: BTreeMap<String, BTreeMap<String, Value>>,

    #[serde(
        default,
        rename = "currentlySyncing",
        alias = "currently_syncing"
    )]
    pub currently_syncing: Option<String>,
}

impl State {
    /// Read a state file. An empty file is an empty state.
    pub fn load(path: impl AsRef<Path>) -> glsync_common::Result<Self> {
        glsync_common::error::read_json_file(path)
    }

    pub fn bookmark(&self, stream: &str, key: &str) -> Option<&Value> {
        self.bookmarks.get(stream)?.get(key)
    }

    /// Stored watermark as an instant, or `None` if absent or unparsable
    pub fn bookmark_instant(&self, stream: &str, key: &str) -> Option<DateTime<Utc>> {
        self.bookmark(stream, key).and_then(parse_instant)
    }

    pub fn set_bookmark(&mut self, stream: &str, key: &str, value: Value) {
        self.bookmarks
            .entry(stream.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Raise the watermark for `stream` to `candidate` unless the stored value
    /// is already later. A stored value that cannot be compared is left alone.
    /// Returns the value now stored.
    pub fn advance_bookmark(&mut self, stream: &str, key: &str, candidate: DateTime<Utc>) -> Value {
        if let Some(existing) = self.bookmark(stream, key) {
            match parse_instant(existing) {
                Some(stored) if stored >= candidate => return existing.clone(),
                Some(_) => {}
                None => {
                    warn!(
                        stream,
                        key,
                        stored = %existing,
                        "Stored bookmark is not a timestamp, keeping it"
                    );
                    return existing.clone();
                }
            }
        }

        let value = Value::String(format_instant(candidate));
        self.set_bookmark(stream, key, value.clone());
        value
    }

    pub fn currently_syncing(&self) -> Option<&str> {
        self.currently_syncing.as_deref()
    }

    pub fn set_currently_syncing(&mut self, stream: Option<&str>) {
        self.currently_syncing = stream.map(str::to_string);
    }
}

/// Canonical watermark form: RFC 3339 in UTC with a `Z` suffix
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse a watermark or replication-key value into a UTC instant.
///
/// Accepts RFC 3339 strings, naive `YYYY-MM-DDTHH:MM:SS[.f]` (taken as UTC),
/// bare dates, and integer epoch seconds.
pub fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_instant_str(s),
        Value::Number(n) => Utc.timestamp_opt(n.as_i64()?, 0).single(),
        _ => None,
    }
}

pub fn parse_instant_str(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // GitLab occasionally omits the colon in the offset (+0000)
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn instant(s: &str) -> DateTime<Utc> {
        parse_instant_str(s).unwrap()
    }

    #[test]
    fn test_parse_variants() {
        let expected = instant("2024-01-02T00:00:00Z");
        assert_eq!(instant("2024-01-02T01:00:00+01:00"), expected);
        assert_eq!(instant("2024-01-02T00:00:00.000+0000"), expected);
        assert_eq!(instant("2024-01-02T00:00:00"), expected);
        assert_eq!(instant("2024-01-02"), expected);
        assert_eq!(parse_instant(&json!(1704153600)), Some(expected));
        assert_eq!(parse_instant(&json!("yesterday")), None);
        assert_eq!(parse_instant(&Value::Null), None);
    }

    #[test]
    fn test_format_instant() {
        assert_eq!(format_instant(instant("2024-01-02T00:00:00Z")), "2024-01-02T00:00:00Z");
        assert_eq!(
            format_instant(instant("2024-01-02T00:00:00.250Z")),
            "2024-01-02T00:00:00.250Z"
        );
    }

    #[test]
    fn test_advance_bookmark_is_monotonic() {
        let mut state = State::default();
        state.advance_bookmark("commits", "committed_date", instant("2024-01-05T00:00:00Z"));
        let kept = state.advance_bookmark("commits", "committed_date", instant("2024-01-01T00:00:00Z"));
        assert_eq!(kept, json!("2024-01-05T00:00:00Z"));

        state.advance_bookmark("commits", "committed_date", instant("2024-02-01T00:00:00Z"));
        assert_eq!(
            state.bookmark("commits", "committed_date"),
            Some(&json!("2024-02-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_unparsable_bookmark_is_kept() {
        let mut state = State::default();
        state.set_bookmark("issues", "updated_at", json!("garbage"));
        state.advance_bookmark("issues", "updated_at", instant("2024-01-01T00:00:00Z"));
        assert_eq!(state.bookmark("issues", "updated_at"), Some(&json!("garbage")));
        assert_eq!(state.bookmark_instant("issues", "updated_at"), None);
    }

    #[test]
    fn test_serialized_shape() {
        let mut state = State::default();
        state.set_bookmark("projects", "updated_at", json!("2024-01-01T00:00:00Z"));
        state.set_currently_syncing(Some("projects"));

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(
            value,
            json!({
                "bookmarks": {"projects": {"updated_at": "2024-01-01T00:00:00Z"}},
                "currentlySyncing": "projects"
            })
        );

        state.set_currently_syncing(None);
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["currentlySyncing"], Value::Null);
    }

    #[test]
    fn test_load_accepts_legacy_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"bookmarks": {{"groups": {{"created_at": "2023-06-01T00:00:00Z"}}}}, "currently_syncing": "groups"}}"#
        )
        .unwrap();

        let state = State::load(file.path()).unwrap();
        assert_eq!(state.currently_syncing(), Some("groups"));
        assert_eq!(
            state.bookmark_instant("groups", "created_at"),
            Some(instant("2023-06-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_load_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(State::load(file.path()).unwrap(), State::default());
    }
}
