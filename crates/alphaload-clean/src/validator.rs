//! Schema validation of fetched batches.
//!
//! The validator only observes: it never removes, coerces or reorders
//! anything in the batch it inspects.

use std::sync::Arc;

use alphaload_types::columns::VALIDATION_FLAG;
use alphaload_types::{ColumnType, TableSchema, ValidationResult};
use arrow::array::{Array, BooleanArray, Float64Array};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;

use crate::columns::{duplicate_count, missing_columns, row_keys, upsert_column};
use crate::error::CleanError;

/// Whether an Arrow column type can hold values of the declared logical type.
///
/// Date and timestamp columns are accepted in their textual and integer
/// (`YYYYMMDD`) source forms because the aligner normalizes them later.
/// An all-null column (`DataType::Null`) is compatible with every type.
#[must_use]
pub fn column_type_accepts(declared: ColumnType, actual: &DataType) -> bool {
    if matches!(actual, DataType::Null) {
        return true;
    }
    match declared {
        ColumnType::Int => is_integer(actual),
        ColumnType::Float => is_numeric(actual),
        ColumnType::Text => is_text(actual),
        ColumnType::Bool => matches!(actual, DataType::Boolean),
        ColumnType::Date => {
            matches!(
                actual,
                DataType::Date32 | DataType::Date64 | DataType::Int32 | DataType::Int64
            ) || is_text(actual)
        }
        ColumnType::Timestamp => {
            matches!(
                actual,
                DataType::Timestamp(_, _) | DataType::Date32 | DataType::Date64
            ) || is_text(actual)
        }
    }
}

fn is_integer(dt: &DataType) -> bool {
    matches!(
        dt,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

pub(crate) fn is_numeric(dt: &DataType) -> bool {
    is_integer(dt)
        || matches!(
            dt,
            DataType::Float16
                | DataType::Float32
                | DataType::Float64
                | DataType::Decimal128(_, _)
                | DataType::Decimal256(_, _)
        )
}

fn is_text(dt: &DataType) -> bool {
    matches!(dt, DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View)
}

/// Validate `batch` against `schema`.
///
/// Checks run in a fixed order: missing required columns, declared type
/// compatibility, nulls in non-nullable required columns, numeric ranges and
/// duplicate primary keys. The first three are fatal and clear `is_valid`;
/// range violations and duplicates are only recorded.
#[must_use]
pub fn validate(batch: &RecordBatch, schema: &TableSchema) -> ValidationResult {
    let mut result = ValidationResult::valid();
    let arrow_schema = batch.schema();

    result.missing_columns = missing_columns(batch, &schema.required_columns);

    for (column, declared) in &schema.column_types {
        let Ok(field) = arrow_schema.field_with_name(column) else {
            continue;
        };
        if !column_type_accepts(*declared, field.data_type()) {
            result.type_errors.insert(
                column.clone(),
                format!("expected {declared}, got {}", field.data_type()),
            );
        }
    }

    for column in &schema.required_columns {
        if schema.is_nullable(column) {
            continue;
        }
        let Some(array) = batch.column_by_name(column) else {
            continue;
        };
        let nulls = array.logical_nulls().map_or(0, |n| n.null_count());
        if nulls > 0 {
            result.null_fields.push(column.clone());
        }
    }

    for (column, range) in &schema.value_ranges {
        if result.type_errors.contains_key(column) {
            continue;
        }
        let Some(array) = batch.column_by_name(column) else {
            continue;
        };
        if matches!(array.data_type(), DataType::Null) {
            continue;
        }
        if !is_numeric(array.data_type()) {
            result.type_errors.insert(
                column.clone(),
                format!("range check needs a numeric column, got {}", array.data_type()),
            );
            continue;
        }
        let values = match cast(array.as_ref(), &DataType::Float64) {
            Ok(values) => values,
            Err(e) => {
                result
                    .type_errors
                    .insert(column.clone(), format!("not castable to float: {e}"));
                continue;
            }
        };
        let Some(values) = values.as_any().downcast_ref::<Float64Array>() else {
            continue;
        };
        for (row, value) in values.iter().enumerate() {
            if let Some(v) = value {
                if !range.contains(v) {
                    result.out_of_range_rows.insert(row);
                }
            }
        }
    }

    if !schema.primary_keys.is_empty() {
        if let Ok(keys) = row_keys(batch, &schema.primary_keys) {
            result.duplicate_count = duplicate_count(&keys);
        }
    }

    result.is_valid = result.missing_columns.is_empty()
        && result.type_errors.is_empty()
        && result.null_fields.is_empty();

    if !result.is_valid {
        tracing::debug!(
            rows = batch.num_rows(),
            summary = %result.summary(),
            "batch failed validation"
        );
    }
    result
}

/// Add the `_validation_flag` column: `true` on rows reported out of range,
/// and on every row of a batch that failed validation.
///
/// # Errors
///
/// Returns an error if the flag column cannot be attached.
pub fn apply_validation_flag(
    batch: &RecordBatch,
    result: &ValidationResult,
) -> Result<RecordBatch, CleanError> {
    let flags: BooleanArray = (0..batch.num_rows())
        .map(|row| Some(!result.is_valid || result.out_of_range_rows.contains(&row)))
        .collect();
    Ok(upsert_column(batch, VALIDATION_FLAG, Arc::new(flags))?)
}
