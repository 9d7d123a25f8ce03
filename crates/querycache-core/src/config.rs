//! Configuration schema (querycache.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Namespace used when none is configured and none can be inferred
pub const UNNAMED_DB: &str = "unnameddb";

/// SQL dialect configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectConfig {
    /// BigQuery SQL dialect
    BigQuery,

    /// Snowflake SQL dialect
    Snowflake,

    /// PostgreSQL SQL dialect
    Postgres,

    /// Generic ANSI SQL
    Ansi,
}

impl Default for DialectConfig {
    fn default() -> Self {
        Self::Ansi
    }
}

/// Serialization backend of a store
///
/// The name doubles as the store's directory component on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Columnar Parquet files
    Parquet,

    /// Generic bincode-serialized tables
    Bincode,
}

impl Default for StoreBackend {
    fn default() -> Self {
        Self::Parquet
    }
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parquet => "parquet",
            Self::Bincode => "bincode",
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "parquet" => Ok(Self::Parquet),
            "bincode" => Ok(Self::Bincode),
            other => Err(ConfigError::InvalidValue {
                field: "store_backend",
                value: other.to_string(),
            }),
        }
    }
}

/// Compression forwarded to the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Snappy,
    Gzip,
    Zstd,
    Lz4,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Snappy => "snappy",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
            Self::Lz4 => "lz4",
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Compression {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "snappy" => Ok(Self::Snappy),
            "gzip" => Ok(Self::Gzip),
            "zstd" => Ok(Self::Zstd),
            "lz4" => Ok(Self::Lz4),
            other => Err(ConfigError::InvalidValue {
                field: "compression",
                value: other.to_string(),
            }),
        }
    }
}

fn default_cache_store() -> PathBuf {
    PathBuf::from(".cache")
}

fn default_true() -> bool {
    true
}

fn default_normalize_max_length() -> usize {
    40_000
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root directory of all stores; relative paths resolve against the working directory
    #[serde(default = "default_cache_store")]
    pub cache_store: PathBuf,

    /// Store namespace; inferred from the connection when unset
    #[serde(default)]
    pub name: Option<String>,

    /// Codec used for result files
    #[serde(default)]
    pub store_backend: StoreBackend,

    /// Normalize queries before deriving keys
    #[serde(default = "default_true")]
    pub normalize: bool,

    /// Upper-case unquoted identifiers as well as keywords
    #[serde(default = "default_true")]
    pub fold_identifiers: bool,

    /// Queries longer than this are keyed on their raw text
    #[serde(default = "default_normalize_max_length")]
    pub normalize_max_length: usize,

    /// Codec compression; `None` picks the codec default
    #[serde(default)]
    pub compression: Option<Compression>,

    /// SQL dialect used to tokenize queries
    #[serde(default)]
    pub dialect: DialectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_store: default_cache_store(),
            name: None,
            store_backend: StoreBackend::default(),
            normalize: true,
            fold_identifiers: true,
            normalize_max_length: default_normalize_max_length(),
            compression: None,
            dialect: DialectConfig::default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Self::from_toml(&contents)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Apply `QUERYCACHE_*` overrides read through `lookup`
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(store) = lookup("QUERYCACHE_CACHE_STORE") {
            self.cache_store = PathBuf::from(store);
        }
        if let Some(name) = lookup("QUERYCACHE_NAME") {
            self.name = Some(name);
        }
        if let Some(backend) = lookup("QUERYCACHE_STORE_BACKEND") {
            self.store_backend = backend.parse()?;
        }
        if let Some(normalize) = lookup("QUERYCACHE_NORMALIZE") {
            self.normalize = parse_bool("normalize", &normalize)?;
        }
        Ok(())
    }

    /// Absolute cache root
    ///
    /// Relative `cache_store` values resolve against the current working directory.
    pub fn resolved_cache_store(&self) -> Result<PathBuf, ConfigError> {
        if self.cache_store.is_absolute() {
            return Ok(self.cache_store.clone());
        }
        let cwd = std::env::current_dir()
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(cwd.join(&self.cache_store))
    }
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field,
            value: value.to_string(),
        }),
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid value for {field}: '{value}'")]
    InvalidValue { field: &'static str, value: String },
}
