//! Generic object codec
//!
//! Serializes the [`Table`] value itself with bincode, so every logical type
//! round-trips. Files start with a fixed header:
//!
//! ```text
//! b"QCOB" | version: u8 | compression: u8 (0 = none, 1 = gzip) | payload
//! ```

use crate::error::CodecError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use querycache_core::{Compression, Table};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

pub const NAME: &str = "bincode";
pub const EXTENSION: &str = "bincode";

const MAGIC: &[u8; 4] = b"QCOB";
const VERSION: u8 = 1;

const FLAG_NONE: u8 = 0;
const FLAG_GZIP: u8 = 1;

/// Codec that stores tables as bincode objects, optionally gzipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCodec {
    compression: Compression,
}

impl ObjectCodec {
    /// Create a codec; only `none` and `gzip` compression are available
    pub fn new(compression: Option<Compression>) -> Result<Self, CodecError> {
        let compression = compression.unwrap_or(Compression::None);
        match compression {
            Compression::None | Compression::Gzip => Ok(Self { compression }),
            other => Err(CodecError::UnsupportedCompression {
                codec: NAME,
                compression: other.to_string(),
            }),
        }
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn encode<W: Write>(&self, table: &Table, mut writer: W) -> Result<(), CodecError> {
        table
            .validate()
            .map_err(|e| CodecError::Encode(e.to_string()))?;

        let flag = match self.compression {
            Compression::Gzip => FLAG_GZIP,
            _ => FLAG_NONE,
        };

        writer.write_all(MAGIC)?;
        writer.write_all(&[VERSION, flag])?;

        if flag == FLAG_GZIP {
            let mut encoder = GzEncoder::new(writer, flate2::Compression::default());
            bincode::serialize_into(&mut encoder, table)
                .map_err(|e| CodecError::Encode(e.to_string()))?;
            encoder.finish()?.flush()?;
        } else {
            bincode::serialize_into(&mut writer, table)
                .map_err(|e| CodecError::Encode(e.to_string()))?;
            writer.flush()?;
        }

        Ok(())
    }

    pub fn decode(&self, path: &Path) -> Result<Table, CodecError> {
        let mut reader = BufReader::new(File::open(path)?);

        let mut header = [0u8; 6];
        reader
            .read_exact(&mut header)
            .map_err(|_| CodecError::Decode("file is too short for a bincode entry".to_string()))?;

        if &header[..4] != MAGIC {
            return Err(CodecError::Decode("not a bincode entry (bad magic)".to_string()));
        }
        if header[4] != VERSION {
            return Err(CodecError::Decode(format!(
                "unsupported bincode entry version {}",
                header[4]
            )));
        }

        let table: Table = match header[5] {
            FLAG_NONE => bincode::deserialize_from(reader),
            FLAG_GZIP => bincode::deserialize_from(GzDecoder::new(reader)),
            other => {
                return Err(CodecError::Decode(format!(
                    "unknown compression flag {}",
                    other
                )))
            }
        }
        .map_err(|e| CodecError::Decode(e.to_string()))?;

        table
            .validate()
            .map_err(|e| CodecError::Decode(e.to_string()))?;

        Ok(table)
    }
}
