//! Cache entries and their metadata sidecar

use chrono::{DateTime, Utc};
use querycache_core::{CacheKey, Table};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Contents of `{key}.json`
///
/// Readable without touching the data file; listing and bundle export only
/// ever parse this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub key: CacheKey,

    /// Query text as the caller wrote it
    pub raw_query: String,

    /// Canonical text the key was derived from
    pub normalized_query: String,

    /// When the originating execution started
    pub created_at: DateTime<Utc>,

    /// Wall-clock seconds the originating execution took
    pub duration: f64,

    /// Backend that wrote the data file
    pub codec: String,

    /// Data file name, relative to the store root
    pub data_file: String,

    pub db_name: String,

    pub num_rows: usize,

    pub num_columns: usize,

    #[serde(default)]
    pub querycache_version: String,
}

impl EntryMetadata {
    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.duration).unwrap_or_default()
    }

    /// Human readable duration, e.g. `1.53s` or `12m 3.20s`
    pub fn duration_display(&self) -> String {
        format_duration(self.duration)
    }
}

/// A fully loaded entry: metadata plus the decoded table
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub metadata: EntryMetadata,
    pub table: Table,
}

impl CacheEntry {
    pub fn key(&self) -> &CacheKey {
        &self.metadata.key
    }
}

pub(crate) fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        return format!("{:.2}s", secs);
    }
    let minutes = (secs / 60.0).floor();
    let rest = secs - minutes * 60.0;
    if minutes < 60.0 {
        format!("{}m {:.2}s", minutes as u64, rest)
    } else {
        format!("{}h {}m {:.2}s", (minutes / 60.0) as u64, minutes as u64 % 60, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_are_readable() {
        assert_eq!(format_duration(0.5), "0.50s");
        assert_eq!(format_duration(61.25), "1m 1.25s");
        assert_eq!(format_duration(3723.0), "1h 2m 3.00s");
    }

    #[test]
    fn metadata_json_shape() {
        let metadata = EntryMetadata {
            key: CacheKey::derive("SELECT 1"),
            raw_query: "select 1".to_string(),
            normalized_query: "SELECT 1".to_string(),
            created_at: Utc::now(),
            duration: 0.25,
            codec: "parquet".to_string(),
            data_file: format!("{}.parquet", CacheKey::derive("SELECT 1")),
            db_name: "db".to_string(),
            num_rows: 1,
            num_columns: 1,
            querycache_version: "0.1.0".to_string(),
        };

        let json: serde_json::Value = serde_json::to_value(&metadata).unwrap();
        for field in ["raw_query", "normalized_query", "created_at", "duration", "codec"] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }

        let parsed: EntryMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, metadata);
        assert_eq!(parsed.duration(), Duration::from_millis(250));
    }

    #[test]
    fn invalid_key_in_metadata_is_rejected() {
        let json = r#"{"key":"nope","raw_query":"","normalized_query":"","created_at":"2020-01-01T00:00:00Z",
            "duration":0.0,"codec":"parquet","data_file":"x","db_name":"d","num_rows":0,"num_columns":0}"#;
        assert!(serde_json::from_str::<EntryMetadata>(json).is_err());
    }
}
