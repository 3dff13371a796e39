//! Parameter records: the argument set for one batch's API call.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar value of a single API-call argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Borrow the value as a string slice if it is textual.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Argument set for one batch's external fetch call.
///
/// Keys are kept sorted so records print and compare deterministically.
/// Records are built once by the planner and never mutated afterwards; the
/// builder methods consume `self`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamRecord(BTreeMap<String, ParamValue>);

impl ParamRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one key.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Merge `extra` into this record. Keys in `extra` take precedence.
    #[must_use]
    pub fn merged(mut self, extra: &ParamRecord) -> Self {
        for (key, value) in &extra.0 {
            self.0.insert(key.clone(), value.clone());
        }
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    /// Textual value for `key`, if present and textual.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(ParamValue::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, ParamValue>> for ParamRecord {
    fn from(map: BTreeMap<String, ParamValue>) -> Self {
        Self(map)
    }
}

impl fmt::Display for ParamRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_params_override_mapped_keys() {
        let mapped = ParamRecord::new()
            .with("start_date", "20230101")
            .with("fields", "close");
        let extra = ParamRecord::new().with("fields", "open,close").with("adj", "qfq");

        let merged = mapped.merged(&extra);
        assert_eq!(merged.get_str("start_date"), Some("20230101"));
        assert_eq!(merged.get_str("fields"), Some("open,close"));
        assert_eq!(merged.get_str("adj"), Some("qfq"));
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn display_is_sorted_by_key() {
        let record = ParamRecord::new().with("end_date", "20230131").with("start_date", "20230101");
        assert_eq!(record.to_string(), "{end_date=20230131, start_date=20230101}");
    }

    #[test]
    fn deserializes_mixed_scalar_values() {
        let record: ParamRecord =
            serde_json::from_str(r#"{"limit": 5000, "ratio": 0.5, "adj": "qfq", "flag": true}"#)
                .unwrap();
        assert_eq!(record.get("limit"), Some(&ParamValue::Int(5000)));
        assert_eq!(record.get("ratio"), Some(&ParamValue::Float(0.5)));
        assert_eq!(record.get_str("adj"), Some("qfq"));
        assert_eq!(record.get("flag"), Some(&ParamValue::Bool(true)));
    }
}
