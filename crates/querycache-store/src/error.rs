//! Store and codec errors

use querycache_core::{CacheKey, ConfigError, LogicalType};
use std::path::PathBuf;

/// Errors raised by a codec while encoding or decoding a table
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("{}", unsupported_type(.codec, .column, .logical_type))]
    UnsupportedType {
        codec: &'static str,
        column: String,
        logical_type: LogicalType,
    },

    #[error("The {codec} backend does not support {compression} compression")]
    UnsupportedCompression {
        codec: &'static str,
        compression: String,
    },

    #[error("Failed to encode table: {0}")]
    Encode(String),

    #[error("Failed to decode table: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the entry store, the cache and bundles
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No cache entry for key {key}")]
    NotFound { key: CacheKey },

    #[error("{} requested key(s) not found in cache: {}", .keys.len(), join_keys(.keys))]
    MissingKeys { keys: Vec<CacheKey> },

    #[error("Corrupt cache entry {key}: {reason}")]
    CorruptEntry { key: CacheKey, reason: String },

    #[error("{}", unsupported_type(.codec, .column, .logical_type))]
    UnsupportedType {
        codec: &'static str,
        column: String,
        logical_type: LogicalType,
    },

    #[error(transparent)]
    Codec(CodecError),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid cache name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Invalid bundle {}: {reason}", .path.display())]
    InvalidBundle { path: PathBuf, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn bundle(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidBundle {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for both single-key and multi-key not-found errors
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::MissingKeys { .. })
    }
}

impl From<CodecError> for StoreError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnsupportedType {
                codec,
                column,
                logical_type,
            } => Self::UnsupportedType {
                codec,
                column,
                logical_type,
            },
            other => Self::Codec(other),
        }
    }
}

fn unsupported_type(codec: &str, column: &str, logical_type: &LogicalType) -> String {
    format!(
        "Column '{}' has type {}, which the {} backend cannot store. \
         Consider using the bincode backend instead (store_backend = \"bincode\")",
        column, logical_type, codec
    )
}

fn join_keys(keys: &[CacheKey]) -> String {
    keys.iter()
        .map(CacheKey::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_type_is_lifted() {
        let err: StoreError = CodecError::UnsupportedType {
            codec: "parquet",
            column: "uuid_col".to_string(),
            logical_type: LogicalType::Uuid,
        }
        .into();

        assert!(matches!(err, StoreError::UnsupportedType { .. }));
        assert!(err.to_string().contains("store_backend = \"bincode\""));
    }

    #[test]
    fn unsupported_type_message_survives_lifting() {
        let codec_err = CodecError::UnsupportedType {
            codec: "parquet",
            column: "amount".to_string(),
            logical_type: LogicalType::Uuid,
        };
        let message = codec_err.to_string();
        let store_err = StoreError::from(codec_err);

        assert_eq!(store_err.to_string(), message);
        assert!(message.starts_with("Column 'amount' has type "));
        assert!(message.contains("the parquet backend cannot store"));
    }

    #[test]
    fn missing_keys_lists_every_key() {
        let a = CacheKey::derive("a");
        let b = CacheKey::derive("b");
        let err = StoreError::MissingKeys {
            keys: vec![a.clone(), b.clone()],
        };

        let message = err.to_string();
        assert!(message.starts_with("2 requested key(s)"));
        assert!(message.contains(a.as_str()));
        assert!(message.contains(b.as_str()));
        assert!(err.is_not_found());
    }
}
