//! Tabular query results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Column types a cached result can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    /// Boolean type
    Bool,

    /// 64-bit signed integer
    Int,

    /// 64-bit floating point
    Float,

    /// UTF-8 text
    String,

    /// Timestamp in UTC
    Timestamp,

    /// UUID object
    ///
    /// Not representable by every codec.
    Uuid,
}

impl std::fmt::Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool => write!(f, "BOOL"),
            Self::Int => write!(f, "INT"),
            Self::Float => write!(f, "FLOAT"),
            Self::String => write!(f, "STRING"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
            Self::Uuid => write!(f, "UUID"),
        }
    }
}

/// A single cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
}

impl Value {
    /// Logical type of this value, `None` for nulls
    pub fn logical_type(&self) -> Option<LogicalType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(LogicalType::Bool),
            Self::Int(_) => Some(LogicalType::Int),
            Self::Float(_) => Some(LogicalType::Float),
            Self::String(_) => Some(LogicalType::String),
            Self::Timestamp(_) => Some(LogicalType::Timestamp),
            Self::Uuid(_) => Some(LogicalType::Uuid),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Uuid(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A named, typed column with its values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,

    /// Logical type
    pub logical_type: LogicalType,

    /// Values in row order
    pub values: Vec<Value>,
}

impl Column {
    /// Create an empty column
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            values: Vec::new(),
        }
    }

    /// Set values
    pub fn with_values<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.values.push(value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Count of null cells
    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_null()).count()
    }
}

/// A query result: ordered, equally long columns
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    /// Ordered list of columns
    pub columns: Vec<Column>,
}

impl Table {
    /// Create a new empty table
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    /// Create a table from columns, checking lengths and value types
    pub fn from_columns(columns: Vec<Column>) -> Result<Self, TableError> {
        let table = Self { columns };
        table.validate()?;
        Ok(table)
    }

    /// Check that every column has the same length and well-typed values
    pub fn validate(&self) -> Result<(), TableError> {
        let expected = self.num_rows();

        for column in &self.columns {
            if column.len() != expected {
                return Err(TableError::LengthMismatch {
                    column: column.name.clone(),
                    expected,
                    actual: column.len(),
                });
            }

            for (row, value) in column.values.iter().enumerate() {
                if let Some(found) = value.logical_type() {
                    if found != column.logical_type {
                        return Err(TableError::TypeMismatch {
                            column: column.name.clone(),
                            row,
                            expected: column.logical_type,
                            found,
                        });
                    }
                }
            }
        }

        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Find a column by name
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get column names
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Values of one row, `None` when out of range
    pub fn row(&self, index: usize) -> Option<Vec<&Value>> {
        if index >= self.num_rows() {
            return None;
        }
        Some(self.columns.iter().map(|c| &c.values[index]).collect())
    }
}

/// Table construction errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TableError {
    #[error("Column '{column}' has {actual} values, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("Column '{column}' row {row}: expected {expected}, found {found}")]
    TypeMismatch {
        column: String,
        row: usize,
        expected: LogicalType,
        found: LogicalType,
    },
}
