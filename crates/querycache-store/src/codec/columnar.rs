//! Parquet codec
//!
//! Tables are converted to a single Arrow record batch and written with the
//! Arrow Parquet writer. The Arrow schema embedded in the file carries the
//! column types back on decode, including for empty results.

use crate::error::CodecError;
use arrow_array::cast::AsArray;
use arrow_array::types::{Float64Type, Int64Type, TimestampMicrosecondType};
use arrow_array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray,
    TimestampMicrosecondArray,
};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use chrono::DateTime;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression as ParquetCompression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use querycache_core::{Column, Compression, LogicalType, Table, Value};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

pub const NAME: &str = "parquet";
pub const EXTENSION: &str = "parquet";

const UTC: &str = "UTC";

/// Columnar codec backed by Parquet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnarCodec {
    compression: Compression,
}

impl ColumnarCodec {
    /// Create a codec; `None` selects snappy
    pub fn new(compression: Option<Compression>) -> Result<Self, CodecError> {
        Ok(Self {
            compression: compression.unwrap_or(Compression::Snappy),
        })
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    fn writer_properties(&self) -> WriterProperties {
        let compression = match self.compression {
            Compression::None => ParquetCompression::UNCOMPRESSED,
            Compression::Snappy => ParquetCompression::SNAPPY,
            Compression::Gzip => ParquetCompression::GZIP(GzipLevel::default()),
            Compression::Zstd => ParquetCompression::ZSTD(ZstdLevel::default()),
            Compression::Lz4 => ParquetCompression::LZ4_RAW,
        };

        WriterProperties::builder()
            .set_compression(compression)
            .build()
    }

    pub fn encode<W: Write + Send>(&self, table: &Table, writer: W) -> Result<(), CodecError> {
        if table.num_columns() == 0 {
            return Err(CodecError::Encode(
                "the parquet backend cannot store a result without columns".to_string(),
            ));
        }
        table
            .validate()
            .map_err(|e| CodecError::Encode(e.to_string()))?;

        let fields = table
            .columns
            .iter()
            .map(|c| Ok(Field::new(c.name.as_str(), arrow_type(c)?, true)))
            .collect::<Result<Vec<_>, CodecError>>()?;
        let schema = Arc::new(Schema::new(fields));

        let arrays = table
            .columns
            .iter()
            .map(to_array)
            .collect::<Result<Vec<_>, CodecError>>()?;

        let batch = RecordBatch::try_new(schema.clone(), arrays)
            .map_err(|e| CodecError::Encode(e.to_string()))?;

        let mut writer = ArrowWriter::try_new(writer, schema, Some(self.writer_properties()))
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        if batch.num_rows() > 0 {
            writer
                .write(&batch)
                .map_err(|e| CodecError::Encode(e.to_string()))?;
        }
        writer
            .close()
            .map_err(|e| CodecError::Encode(e.to_string()))?;

        Ok(())
    }

    pub fn decode(&self, path: &Path) -> Result<Table, CodecError> {
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| CodecError::Decode(e.to_string()))?;

        let mut columns = builder
            .schema()
            .fields()
            .iter()
            .map(|f| Ok(Column::new(f.name().as_str(), logical_type(f.data_type())?)))
            .collect::<Result<Vec<_>, CodecError>>()?;

        let reader = builder
            .build()
            .map_err(|e| CodecError::Decode(e.to_string()))?;

        for batch in reader {
            let batch = batch.map_err(|e| CodecError::Decode(e.to_string()))?;
            for (column, array) in columns.iter_mut().zip(batch.columns()) {
                append_values(column, array.as_ref())?;
            }
        }

        Table::from_columns(columns).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

fn arrow_type(column: &Column) -> Result<DataType, CodecError> {
    match column.logical_type {
        LogicalType::Bool => Ok(DataType::Boolean),
        LogicalType::Int => Ok(DataType::Int64),
        LogicalType::Float => Ok(DataType::Float64),
        LogicalType::String => Ok(DataType::Utf8),
        LogicalType::Timestamp => Ok(DataType::Timestamp(TimeUnit::Microsecond, Some(UTC.into()))),
        LogicalType::Uuid => Err(CodecError::UnsupportedType {
            codec: NAME,
            column: column.name.clone(),
            logical_type: column.logical_type,
        }),
    }
}

fn logical_type(data_type: &DataType) -> Result<LogicalType, CodecError> {
    match data_type {
        DataType::Boolean => Ok(LogicalType::Bool),
        DataType::Int64 => Ok(LogicalType::Int),
        DataType::Float64 => Ok(LogicalType::Float),
        DataType::Utf8 | DataType::LargeUtf8 => Ok(LogicalType::String),
        DataType::Timestamp(TimeUnit::Microsecond, _) => Ok(LogicalType::Timestamp),
        other => Err(CodecError::Decode(format!("unsupported arrow type {}", other))),
    }
}

fn to_array(column: &Column) -> Result<ArrayRef, CodecError> {
    // encode validated the table, so every non-null value matches the column type
    let array: ArrayRef = match column.logical_type {
        LogicalType::Bool => Arc::new(BooleanArray::from(
            column
                .values
                .iter()
                .map(|v| match v {
                    Value::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        LogicalType::Int => Arc::new(Int64Array::from(
            column
                .values
                .iter()
                .map(|v| match v {
                    Value::Int(i) => Some(*i),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        LogicalType::Float => Arc::new(Float64Array::from(
            column
                .values
                .iter()
                .map(|v| match v {
                    Value::Float(f) => Some(*f),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        LogicalType::String => Arc::new(StringArray::from(
            column
                .values
                .iter()
                .map(|v| match v {
                    Value::String(s) => Some(s.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        LogicalType::Timestamp => Arc::new(
            TimestampMicrosecondArray::from(
                column
                    .values
                    .iter()
                    .map(|v| match v {
                        Value::Timestamp(ts) => Some(ts.timestamp_micros()),
                        _ => None,
                    })
                    .collect::<Vec<_>>(),
            )
            .with_timezone(UTC),
        ),
        LogicalType::Uuid => {
            return Err(CodecError::UnsupportedType {
                codec: NAME,
                column: column.name.clone(),
                logical_type: column.logical_type,
            })
        }
    };

    Ok(array)
}

fn append_values(column: &mut Column, array: &dyn Array) -> Result<(), CodecError> {
    match column.logical_type {
        LogicalType::Bool => {
            column
                .values
                .extend(array.as_boolean().iter().map(Value::from));
        }
        LogicalType::Int => {
            column
                .values
                .extend(array.as_primitive::<Int64Type>().iter().map(Value::from));
        }
        LogicalType::Float => {
            column
                .values
                .extend(array.as_primitive::<Float64Type>().iter().map(Value::from));
        }
        LogicalType::String => match array.data_type() {
            DataType::LargeUtf8 => column
                .values
                .extend(array.as_string::<i64>().iter().map(Value::from)),
            _ => column
                .values
                .extend(array.as_string::<i32>().iter().map(Value::from)),
        },
        LogicalType::Timestamp => {
            for micros in array.as_primitive::<TimestampMicrosecondType>().iter() {
                let value = match micros {
                    Some(m) => Value::Timestamp(DateTime::from_timestamp_micros(m).ok_or_else(
                        || CodecError::Decode(format!("timestamp out of range in '{}'", column.name)),
                    )?),
                    None => Value::Null,
                };
                column.values.push(value);
            }
        }
        LogicalType::Uuid => {
            return Err(CodecError::Decode(format!(
                "unexpected UUID column '{}' in parquet file",
                column.name
            )))
        }
    }

    Ok(())
}
