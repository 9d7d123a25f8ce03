//! QueryCache Core
//!
//! Shared domain model: the tabular result type, cache keys, and configuration.
//! The on-disk names produced here (key encoding, backend names) are part of the
//! storage format - never change them without a migration.

pub mod table;
pub mod key;
pub mod config;

pub use table::{LogicalType, Value, Column, Table, TableError};
pub use key::{CacheKey, KeyError, KEY_LENGTH};
pub use config::{Config, ConfigError, Compression, DialectConfig, StoreBackend, UNNAMED_DB};
