//! Cache keys derived from canonical query text

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of the hex encoding of a key (SHA-256 -> 32 bytes -> 64 chars)
pub const KEY_LENGTH: usize = 64;

/// Fixed-length identifier of one cache entry
///
/// The key is the lowercase hex SHA-256 digest of the canonical query text.
/// It contains only `[0-9a-f]`, so it is safe as a file name on every platform.
///
/// Bound parameter values are not part of the key: two executions of the same
/// text always map to the same entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for an already-canonicalized query
    pub fn derive(canonical_sql: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical_sql.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Parse a key from its string encoding (file stems, CLI input, bundle paths)
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        if s.len() != KEY_LENGTH {
            return Err(KeyError::InvalidLength {
                key: s.to_string(),
                length: s.len(),
            });
        }

        if !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(KeyError::InvalidCharacter(s.to_string()));
        }

        Ok(Self(s.to_string()))
    }

    /// String encoding of the key
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log messages and tables
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CacheKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

impl std::str::FromStr for CacheKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Errors raised when parsing an externally supplied key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid cache key '{key}': expected {} hex characters, got {length}", KEY_LENGTH)]
    InvalidLength { key: String, length: usize },

    #[error("Invalid cache key '{0}': only lowercase hex characters are allowed")]
    InvalidCharacter(String),
}
