//! Test fixtures for store integration tests
//!
//! Result tables shaped like what a warehouse query returns, plus helpers to
//! open caches rooted in temporary directories.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use querycache_core::{Column, LogicalType, StoreBackend, Table};
use querycache_sql::SqlNormalizer;
use querycache_store::{Cache, Codec};
use std::path::Path;

/// Receipts aggregated per taxpayer, with nulls in every nullable column
pub fn receipts_table() -> Table {
    Table::from_columns(vec![
        Column::new("tin", LogicalType::String).with_values([
            Some("100200300"),
            Some("100200301"),
            None,
            Some("100200303"),
        ]),
        Column::new("receipts", LogicalType::Int).with_values([Some(12i64), Some(3), Some(0), None]),
        Column::new("total", LogicalType::Float).with_values([Some(1520.75f64), None, Some(0.0), Some(-3.5)]),
        Column::new("is_active", LogicalType::Bool).with_values([Some(true), Some(false), None, Some(true)]),
        Column::new("first_seen", LogicalType::Timestamp).with_values([
            Some(Utc.with_ymd_and_hms(2018, 6, 1, 8, 0, 0).unwrap()),
            Some(Utc.with_ymd_and_hms(2018, 6, 9, 23, 59, 59).unwrap()),
            None,
            Some(Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap()),
        ]),
    ])
    .unwrap()
}

/// A table with a UUID column, which only the bincode backend can store
pub fn uuid_table() -> Table {
    Table::from_columns(vec![
        Column::new("id", LogicalType::Uuid).with_values([
            Some(uuid::Uuid::from_u128(0x1234)),
            None,
            Some(uuid::Uuid::from_u128(u128::MAX)),
        ]),
        Column::new("label", LogicalType::String).with_values([Some("a"), Some("b"), None]),
    ])
    .unwrap()
}

/// A single-column table holding `value`
pub fn single_value(value: i64) -> Table {
    Table::from_columns(vec![Column::new("value", LogicalType::Int).with_values([value])]).unwrap()
}

/// Open a cache named `name` under `root`
pub fn cache_in(root: &Path, name: &str, backend: StoreBackend) -> Cache {
    let codec = Codec::for_backend(backend, None).unwrap();
    Cache::new(SqlNormalizer::new(), root, name, codec)
}

/// Sorted data file names under a store root
pub fn data_files(cache: &Cache) -> Vec<String> {
    let extension = cache.store().codec().extension();
    let mut names: Vec<String> = std::fs::read_dir(cache.root())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(&format!(".{}", extension)))
        .collect();
    names.sort();
    names
}
