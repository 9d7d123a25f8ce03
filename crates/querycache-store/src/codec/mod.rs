//! Result codecs
//!
//! A store holds every entry in one format. The set of formats is closed:
//! adding a backend means adding a [`Codec`] variant, the store and cache only
//! talk to this enum.
//!
//! - [`ColumnarCodec`]: Parquet files. Fast and compact, but limited to the
//!   column types Arrow can represent.
//! - [`ObjectCodec`]: bincode-serialized tables. Stores every [`LogicalType`]
//!   (including UUID objects) at the cost of size and speed.
//!
//! [`LogicalType`]: querycache_core::LogicalType

pub mod columnar;
pub mod object;

pub use columnar::ColumnarCodec;
pub use object::ObjectCodec;

use crate::error::CodecError;
use querycache_core::{Compression, StoreBackend, Table};
use std::io::Write;
use std::path::Path;

/// A table serializer bound to one backend and compression setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Codec {
    Columnar(ColumnarCodec),
    Object(ObjectCodec),
}

impl Codec {
    /// Build the codec for a backend
    ///
    /// `compression` of `None` selects the backend's default.
    pub fn for_backend(
        backend: StoreBackend,
        compression: Option<Compression>,
    ) -> Result<Self, CodecError> {
        match backend {
            StoreBackend::Parquet => Ok(Self::Columnar(ColumnarCodec::new(compression)?)),
            StoreBackend::Bincode => Ok(Self::Object(ObjectCodec::new(compression)?)),
        }
    }

    pub fn backend(&self) -> StoreBackend {
        match self {
            Self::Columnar(_) => StoreBackend::Parquet,
            Self::Object(_) => StoreBackend::Bincode,
        }
    }

    /// Name recorded in entry metadata
    pub fn name(&self) -> &'static str {
        self.backend().as_str()
    }

    /// Data file extension, without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Columnar(_) => columnar::EXTENSION,
            Self::Object(_) => object::EXTENSION,
        }
    }

    pub fn compression(&self) -> Compression {
        match self {
            Self::Columnar(c) => c.compression(),
            Self::Object(c) => c.compression(),
        }
    }

    /// Encode `table` into `writer`
    pub fn encode<W: Write + Send>(&self, table: &Table, writer: W) -> Result<(), CodecError> {
        match self {
            Self::Columnar(c) => c.encode(table, writer),
            Self::Object(c) => c.encode(table, writer),
        }
    }

    /// Decode the table stored at `path`
    pub fn decode(&self, path: &Path) -> Result<Table, CodecError> {
        match self {
            Self::Columnar(c) => c.decode(path),
            Self::Object(c) => c.decode(path),
        }
    }
}
