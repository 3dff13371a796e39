//! Destination table schema declarations.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical column type declared for a destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Int,
    Float,
    Text,
    Date,
    Timestamp,
    Bool,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::Bool => "bool",
        };
        f.write_str(s)
    }
}

/// Inclusive numeric bounds for a column. Written as `[min, max]` in config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl From<(f64, f64)> for ValueRange {
    fn from((min, max): (f64, f64)) -> Self {
        Self { min, max }
    }
}

impl From<ValueRange> for (f64, f64) {
    fn from(range: ValueRange) -> Self {
        (range.min, range.max)
    }
}

/// Schema of one destination table, shared read-only by every batch of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub required_columns: Vec<String>,
    #[serde(default)]
    pub column_types: BTreeMap<String, ColumnType>,
    #[serde(default)]
    pub nullable_columns: Vec<String>,
    #[serde(default)]
    pub value_ranges: BTreeMap<String, ValueRange>,
    /// Composite key used for duplicate detection.
    #[serde(default)]
    pub primary_keys: Vec<String>,
}

impl TableSchema {
    #[must_use]
    pub fn new<I, S>(required_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required_columns: required_columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_type(mut self, column: impl Into<String>, ty: ColumnType) -> Self {
        self.column_types.insert(column.into(), ty);
        self
    }

    #[must_use]
    pub fn with_nullable(mut self, column: impl Into<String>) -> Self {
        self.nullable_columns.push(column.into());
        self
    }

    #[must_use]
    pub fn with_range(mut self, column: impl Into<String>, min: f64, max: f64) -> Self {
        self.value_ranges.insert(column.into(), ValueRange { min, max });
        self
    }

    #[must_use]
    pub fn with_primary_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn is_nullable(&self, column: &str) -> bool {
        self.nullable_columns.iter().any(|c| c == column)
    }
}
