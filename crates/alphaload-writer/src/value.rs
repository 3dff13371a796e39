//! Owned SQL values exchanged with a [`crate::DbManager`].

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tokio_postgres::types::ToSql;

/// A single typed SQL value.
///
/// Each variant carries an `Option` so a NULL keeps its column type when
/// bound as a parameter. [`SqlValue::Null`] is an untyped NULL, rendered as a
/// literal instead of a bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(Option<bool>),
    Int16(Option<i16>),
    Int32(Option<i32>),
    Int64(Option<i64>),
    Float32(Option<f32>),
    Float64(Option<f64>),
    Text(Option<String>),
    Date(Option<NaiveDate>),
    Timestamp(Option<NaiveDateTime>),
    TimestampTz(Option<DateTime<Utc>>),
    Bytes(Option<Vec<u8>>),
}

impl SqlValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(v) => v.is_none(),
            Self::Int16(v) => v.is_none(),
            Self::Int32(v) => v.is_none(),
            Self::Int64(v) => v.is_none(),
            Self::Float32(v) => v.is_none(),
            Self::Float64(v) => v.is_none(),
            Self::Text(v) => v.is_none(),
            Self::Date(v) => v.is_none(),
            Self::Timestamp(v) => v.is_none(),
            Self::TimestampTz(v) => v.is_none(),
            Self::Bytes(v) => v.is_none(),
        }
    }

    /// Integer view of any integer variant.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int16(v) => v.map(i64::from),
            Self::Int32(v) => v.map(i64::from),
            Self::Int64(v) => *v,
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => v.as_deref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(v) => *v,
            Self::Timestamp(v) => v.map(|ts| ts.date()),
            Self::TimestampTz(v) => v.map(|ts| ts.date_naive()),
            _ => None,
        }
    }

    /// Bind view for `tokio-postgres`. Returns `None` for [`SqlValue::Null`],
    /// which has no parameter type.
    #[must_use]
    pub fn as_tosql(&self) -> Option<&(dyn ToSql + Sync)> {
        let value: &(dyn ToSql + Sync) = match self {
            Self::Null => return None,
            Self::Bool(v) => v,
            Self::Int16(v) => v,
            Self::Int32(v) => v,
            Self::Int64(v) => v,
            Self::Float32(v) => v,
            Self::Float64(v) => v,
            Self::Text(v) => v,
            Self::Date(v) => v,
            Self::Timestamp(v) => v,
            Self::TimestampTz(v) => v,
            Self::Bytes(v) => v,
        };
        Some(value)
    }

    /// Ordering between two values of the same kind. NULLs sort first;
    /// mismatched kinds are unordered.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Some(Ordering::Equal),
            (true, false) => return Some(Ordering::Less),
            (false, true) => return Some(Ordering::Greater),
            (false, false) => {}
        }
        if let (Some(a), Some(b)) = (self.as_i64(), other.as_i64()) {
            return Some(a.cmp(&b));
        }
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.partial_cmp(b),
            (Self::Float32(a), Self::Float32(b)) => a.partial_cmp(b),
            (Self::Float64(a), Self::Float64(b)) => a.partial_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.partial_cmp(b),
            (Self::Date(a), Self::Date(b)) => a.partial_cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.partial_cmp(b),
            (Self::TimestampTz(a), Self::TimestampTz(b)) => a.partial_cmp(b),
            (Self::Bytes(a), Self::Bytes(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::Display>(f: &mut fmt::Formatter<'_>, v: Option<&T>) -> fmt::Result {
            match v {
                Some(v) => write!(f, "{v}"),
                None => f.write_str("NULL"),
            }
        }
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => opt(f, v.as_ref()),
            Self::Int16(v) => opt(f, v.as_ref()),
            Self::Int32(v) => opt(f, v.as_ref()),
            Self::Int64(v) => opt(f, v.as_ref()),
            Self::Float32(v) => opt(f, v.as_ref()),
            Self::Float64(v) => opt(f, v.as_ref()),
            Self::Text(v) => opt(f, v.as_ref()),
            Self::Date(v) => opt(f, v.as_ref()),
            Self::Timestamp(v) => opt(f, v.as_ref()),
            Self::TimestampTz(v) => opt(f, v.as_ref()),
            Self::Bytes(v) => match v {
                Some(bytes) => write!(f, "<{} bytes>", bytes.len()),
                None => f.write_str("NULL"),
            },
        }
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(Some(v.to_owned()))
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(Some(v))
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int64(Some(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float64(Some(v))
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        Self::Date(Some(v))
    }
}
