//! Column-level helpers shared by the clean stages.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, UInt32Array};
use arrow::compute::take;
use arrow::datatypes::{Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;

const KEY_SEPARATOR: char = '\u{1f}';

/// Columns present in `before` but absent from `after`.
///
/// Every compliant clean stage must produce an empty list.
#[must_use]
pub fn detect_dropped_columns(before: &Schema, after: &Schema) -> Vec<String> {
    before
        .fields()
        .iter()
        .map(|field| field.name())
        .filter(|name| after.index_of(name.as_str()).is_err())
        .cloned()
        .collect()
}

/// Replace column `name` in place, or append it when absent.
///
/// The replaced field keeps its position so column order stays stable across
/// stages. Added and replaced fields are always nullable.
///
/// # Errors
///
/// Returns an error if `array` does not have the batch's row count.
pub fn upsert_column(
    batch: &RecordBatch,
    name: &str,
    array: ArrayRef,
) -> Result<RecordBatch, ArrowError> {
    let schema = batch.schema();
    let mut fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|field| field.as_ref().clone())
        .collect();
    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
    let field = Field::new(name, array.data_type().clone(), true);

    if let Ok(index) = schema.index_of(name) {
        fields[index] = field;
        columns[index] = array;
    } else {
        fields.push(field);
        columns.push(array);
    }

    RecordBatch::try_new(
        Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone())),
        columns,
    )
}

/// Names from `wanted` that are not columns of `batch`.
#[must_use]
pub fn missing_columns(batch: &RecordBatch, wanted: &[String]) -> Vec<String> {
    let schema = batch.schema();
    wanted
        .iter()
        .filter(|name| schema.index_of(name).is_err())
        .cloned()
        .collect()
}

/// Composite key string per row over `key_columns`, or `None` for rows with
/// a null key part. Null never equals null, so those rows have no key.
///
/// # Errors
///
/// Returns an error if a key column is missing or a value cannot be rendered.
pub fn row_keys(
    batch: &RecordBatch,
    key_columns: &[String],
) -> Result<Vec<Option<String>>, ArrowError> {
    let arrays = key_columns
        .iter()
        .map(|name| {
            batch.column_by_name(name).cloned().ok_or_else(|| {
                ArrowError::SchemaError(format!("key column '{name}' not found"))
            })
        })
        .collect::<Result<Vec<ArrayRef>, ArrowError>>()?;

    let mut keys = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        if arrays.iter().any(|array| array.is_null(row)) {
            keys.push(None);
            continue;
        }
        let mut key = String::new();
        for (pos, array) in arrays.iter().enumerate() {
            if pos > 0 {
                key.push(KEY_SEPARATOR);
            }
            key.push_str(&array_value_to_string(array.as_ref(), row)?);
        }
        keys.push(Some(key));
    }
    Ok(keys)
}

/// Number of keyed rows whose key already appeared earlier in `keys`.
#[must_use]
pub fn duplicate_count(keys: &[Option<String>]) -> usize {
    let keyed: Vec<&str> = keys.iter().flatten().map(String::as_str).collect();
    let unique: HashSet<&str> = keyed.iter().copied().collect();
    keyed.len() - unique.len()
}

/// Number of rows without a key because a key part is null.
#[must_use]
pub fn null_key_count(keys: &[Option<String>]) -> usize {
    keys.iter().filter(|key| key.is_none()).count()
}

/// Row indices to keep so that each key survives once, at its last
/// position. Rows without a key are always kept.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn keep_last_indices(keys: &[Option<String>]) -> Vec<u32> {
    let mut last: HashMap<&str, usize> = HashMap::with_capacity(keys.len());
    for (row, key) in keys.iter().enumerate() {
        if let Some(key) = key {
            last.insert(key.as_str(), row);
        }
    }
    keys.iter()
        .enumerate()
        .filter(|(row, key)| match key {
            Some(key) => last.get(key.as_str()) == Some(row),
            None => true,
        })
        .map(|(row, _)| row as u32)
        .collect()
}

/// Take the given rows from every column.
///
/// # Errors
///
/// Returns an error if an index is out of bounds.
pub fn select_rows(batch: &RecordBatch, indices: &[u32]) -> Result<RecordBatch, ArrowError> {
    let idx = UInt32Array::from(indices.to_vec());
    let idx_ref = &idx as &dyn Array;
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());
    for column in batch.columns() {
        arrays.push(take(column.as_ref(), idx_ref, None)?);
    }
    RecordBatch::try_new(Arc::clone(&batch.schema()), arrays)
}

/// Remove rows with a repeated composite key, keeping the last occurrence.
/// Returns the deduplicated batch and the number of rows removed.
///
/// # Errors
///
/// Returns an error if a key column is missing.
pub fn dedup_keep_last(
    batch: &RecordBatch,
    key_columns: &[String],
) -> Result<(RecordBatch, usize), ArrowError> {
    let keys = row_keys(batch, key_columns)?;
    if duplicate_count(&keys) == 0 {
        return Ok((batch.clone(), 0));
    }
    let indices = keep_last_indices(&keys);
    let removed = batch.num_rows() - indices.len();
    Ok((select_rows(batch, &indices)?, removed))
}
