//! Unit standardization: monetary amounts to yuan, volumes to shares.

use std::fmt;
use std::sync::Arc;

use alphaload_types::columns::UNADJUSTED_SUFFIX;
use arrow::array::{Array, ArrayRef, Float64Array};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::columns::upsert_column;
use crate::error::CleanError;
use crate::validator::is_numeric;

/// Source unit of a monetary column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonetaryUnit {
    #[serde(alias = "元")]
    Yuan,
    #[serde(alias = "万元")]
    WanYuan,
    #[serde(alias = "亿元")]
    YiYuan,
}

impl MonetaryUnit {
    /// Multiplier to yuan.
    #[must_use]
    pub fn factor(self) -> f64 {
        match self {
            Self::Yuan => 1.0,
            Self::WanYuan => 1e4,
            Self::YiYuan => 1e8,
        }
    }

    /// ASCII code used in preserved column names.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Yuan => "yuan",
            Self::WanYuan => "wan_yuan",
            Self::YiYuan => "yi_yuan",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Yuan => "元",
            Self::WanYuan => "万元",
            Self::YiYuan => "亿元",
        }
    }
}

impl fmt::Display for MonetaryUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Source unit of a volume column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeUnit {
    #[serde(alias = "股")]
    Shares,
    #[serde(alias = "手", alias = "lot")]
    Lots,
}

impl VolumeUnit {
    /// Multiplier to shares.
    #[must_use]
    pub fn factor(self) -> f64 {
        match self {
            Self::Shares => 1.0,
            Self::Lots => 100.0,
        }
    }

    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Shares => "shares",
            Self::Lots => "lot",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Shares => "股",
            Self::Lots => "手",
        }
    }
}

impl fmt::Display for VolumeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Multiplies columns into base units, optionally keeping the original values
/// beside them as `{column}_{unit code}`.
#[derive(Debug, Clone, Copy)]
pub struct Standardizer {
    pub preserve_original: bool,
}

impl Default for Standardizer {
    fn default() -> Self {
        Self {
            preserve_original: true,
        }
    }
}

impl Standardizer {
    #[must_use]
    pub fn new(preserve_original: bool) -> Self {
        Self { preserve_original }
    }

    /// Convert `columns` from `unit` to yuan.
    ///
    /// # Errors
    ///
    /// Returns [`CleanError::Standardization`] for a missing or non-numeric column.
    pub fn convert_monetary(
        &self,
        batch: &RecordBatch,
        columns: &[String],
        unit: MonetaryUnit,
    ) -> Result<RecordBatch, CleanError> {
        self.scale(batch, columns, unit.factor(), unit.code(), unit.label())
    }

    /// Convert `columns` from `unit` to shares.
    ///
    /// # Errors
    ///
    /// Returns [`CleanError::Standardization`] for a missing or non-numeric column.
    pub fn convert_volume(
        &self,
        batch: &RecordBatch,
        columns: &[String],
        unit: VolumeUnit,
    ) -> Result<RecordBatch, CleanError> {
        self.scale(batch, columns, unit.factor(), unit.code(), unit.label())
    }

    fn scale(
        &self,
        batch: &RecordBatch,
        columns: &[String],
        factor: f64,
        unit_code: &str,
        unit_label: &str,
    ) -> Result<RecordBatch, CleanError> {
        let mut out = batch.clone();
        for column in columns {
            let array = numeric_column(&out, column)?;
            if (factor - 1.0).abs() < f64::EPSILON {
                continue;
            }
            if self.preserve_original {
                out = upsert_column(&out, &format!("{column}_{unit_code}"), Arc::clone(&array))?;
            }
            let values = cast(array.as_ref(), &DataType::Float64)?;
            let values = values
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| {
                    CleanError::Standardization(format!("column '{column}' is not castable to float"))
                })?;
            let scaled: Float64Array = values.iter().map(|v| v.map(|x| x * factor)).collect();
            out = upsert_column(&out, column, Arc::new(scaled))?;
            tracing::info!(
                column = %column,
                unit = unit_label,
                factor,
                rows = out.num_rows(),
                "converted column to base unit"
            );
        }
        Ok(out)
    }

    /// Copy each price column to `{column}_unadj` before any adjustment.
    ///
    /// An existing `_unadj` column is left untouched so reruns keep the first
    /// captured values.
    ///
    /// # Errors
    ///
    /// Returns [`CleanError::Standardization`] for a missing column.
    pub fn preserve_unadjusted(
        &self,
        batch: &RecordBatch,
        columns: &[String],
    ) -> Result<RecordBatch, CleanError> {
        let mut out = batch.clone();
        for column in columns {
            let array = out.column_by_name(column).cloned().ok_or_else(|| {
                CleanError::Standardization(format!("price column '{column}' not found"))
            })?;
            let target = format!("{column}{UNADJUSTED_SUFFIX}");
            if out.column_by_name(&target).is_some() {
                continue;
            }
            out = upsert_column(&out, &target, array)?;
            tracing::debug!(column = %column, "preserved unadjusted values");
        }
        Ok(out)
    }
}

fn numeric_column(batch: &RecordBatch, column: &str) -> Result<ArrayRef, CleanError> {
    let array = batch
        .column_by_name(column)
        .cloned()
        .ok_or_else(|| CleanError::Standardization(format!("column '{column}' not found")))?;
    if !is_numeric(array.data_type()) && !matches!(array.data_type(), DataType::Null) {
        return Err(CleanError::Standardization(format!(
            "column '{column}' is {}, expected a numeric type",
            array.data_type()
        )));
    }
    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};

    fn bars() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("amount", DataType::Float64, true),
            Field::new("vol", DataType::Int64, true),
            Field::new("close", DataType::Float64, true),
            Field::new("name", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Float64Array::from(vec![Some(1.5), None])),
                Arc::new(Int64Array::from(vec![Some(12), Some(3)])),
                Arc::new(Float64Array::from(vec![Some(10.0), Some(11.0)])),
                Arc::new(StringArray::from(vec!["a", "b"])),
            ],
        )
        .unwrap()
    }

    fn floats<'a>(batch: &'a RecordBatch, name: &str) -> &'a Float64Array {
        batch
            .column_by_name(name)
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap()
    }

    #[test]
    fn monetary_conversion_keeps_original_column() {
        let out = Standardizer::default()
            .convert_monetary(&bars(), &["amount".into()], MonetaryUnit::WanYuan)
            .unwrap();
        assert!((floats(&out, "amount").value(0) - 15_000.0).abs() < 1e-9);
        assert!(floats(&out, "amount").is_null(1));
        assert!((floats(&out, "amount_wan_yuan").value(0) - 1.5).abs() < 1e-9);
        assert_eq!(out.num_columns(), 5);
    }

    #[test]
    fn volume_conversion_without_preserve() {
        let out = Standardizer::new(false)
            .convert_volume(&bars(), &["vol".into()], VolumeUnit::Lots)
            .unwrap();
        assert_eq!(out.num_columns(), 4);
        assert!((floats(&out, "vol").value(0) - 1200.0).abs() < 1e-9);
    }

    #[test]
    fn identity_unit_is_a_no_op() {
        let batch = bars();
        let out = Standardizer::default()
            .convert_monetary(&batch, &["amount".into()], MonetaryUnit::Yuan)
            .unwrap();
        assert_eq!(out, batch);
    }

    #[test]
    fn non_numeric_column_is_rejected() {
        let err = Standardizer::default()
            .convert_monetary(&bars(), &["name".into()], MonetaryUnit::YiYuan)
            .unwrap_err();
        assert!(matches!(err, CleanError::Standardization(_)));
    }

    #[test]
    fn unadjusted_copy_is_taken_once() {
        let s = Standardizer::default();
        let once = s.preserve_unadjusted(&bars(), &["close".into()]).unwrap();
        assert!((floats(&once, "close_unadj").value(1) - 11.0).abs() < 1e-9);
        let twice = s.preserve_unadjusted(&once, &["close".into()]).unwrap();
        assert_eq!(twice.num_columns(), once.num_columns());
    }

    #[test]
    fn units_accept_chinese_labels() {
        let unit: MonetaryUnit = serde_yaml::from_str("亿元").unwrap();
        assert_eq!(unit, MonetaryUnit::YiYuan);
        let unit: VolumeUnit = serde_yaml::from_str("手").unwrap();
        assert_eq!(unit, VolumeUnit::Lots);
        let unit: MonetaryUnit = serde_yaml::from_str("wan_yuan").unwrap();
        assert!((unit.factor() - 1e4).abs() < f64::EPSILON);
    }
}
