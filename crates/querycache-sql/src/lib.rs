//! SQL canonicalization
//!
//! This crate turns query text into the canonical form cache keys are derived from:
//! - Tokenizing SQL with datafusion-sqlparser-rs
//! - Dropping comments, insignificant whitespace and trailing semicolons
//! - Upper-casing keywords (and, optionally, unquoted identifiers)
//! - Leaving quoted literals and identifiers untouched

pub mod normalizer;

pub use normalizer::{SqlNormalizer, NormalizeError};
