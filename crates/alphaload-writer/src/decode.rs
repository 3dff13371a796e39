//! Arrow `RecordBatch` decoding into SQL row values.
//!
//! Columns are first cast to a small set of bindable Arrow types, then
//! downcast once per column per batch.

use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Float32Array, Float64Array,
    Int16Array, Int32Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, TimeUnit};
use arrow::record_batch::RecordBatch;

use crate::error::WriteError;
use crate::value::SqlValue;

/// The Arrow type a column is cast to before binding.
#[must_use]
pub fn bindable_type(dt: &DataType) -> DataType {
    match dt {
        DataType::Int8 | DataType::UInt8 | DataType::Int16 => DataType::Int16,
        DataType::UInt16 | DataType::Int32 => DataType::Int32,
        DataType::UInt32 | DataType::Int64 | DataType::UInt64 => DataType::Int64,
        DataType::Float32 => DataType::Float32,
        DataType::Float16
        | DataType::Float64
        | DataType::Decimal128(_, _)
        | DataType::Decimal256(_, _) => DataType::Float64,
        DataType::Boolean => DataType::Boolean,
        DataType::Date32 | DataType::Date64 => DataType::Date32,
        DataType::Timestamp(_, tz) => DataType::Timestamp(TimeUnit::Microsecond, tz.clone()),
        DataType::Binary | DataType::LargeBinary => DataType::Binary,
        DataType::Null => DataType::Null,
        _ => DataType::Utf8,
    }
}

/// Pre-downcast column reference.
enum TypedCol<'a> {
    Int16(&'a Int16Array),
    Int32(&'a Int32Array),
    Int64(&'a Int64Array),
    Float32(&'a Float32Array),
    Float64(&'a Float64Array),
    Boolean(&'a BooleanArray),
    Utf8(&'a StringArray),
    Timestamp(&'a TimestampMicrosecondArray),
    TimestampTz(&'a TimestampMicrosecondArray),
    Date32(&'a Date32Array),
    Binary(&'a BinaryArray),
    Null,
}

fn downcast<'a, T: 'static>(col: &'a ArrayRef, idx: usize) -> Result<&'a T, WriteError> {
    col.as_any().downcast_ref::<T>().ok_or_else(|| {
        WriteError::Decode(format!(
            "downcast failed for column {idx} ({})",
            col.data_type()
        ))
    })
}

fn typed_col(col: &ArrayRef, idx: usize) -> Result<TypedCol<'_>, WriteError> {
    Ok(match col.data_type() {
        DataType::Int16 => TypedCol::Int16(downcast(col, idx)?),
        DataType::Int32 => TypedCol::Int32(downcast(col, idx)?),
        DataType::Int64 => TypedCol::Int64(downcast(col, idx)?),
        DataType::Float32 => TypedCol::Float32(downcast(col, idx)?),
        DataType::Float64 => TypedCol::Float64(downcast(col, idx)?),
        DataType::Boolean => TypedCol::Boolean(downcast(col, idx)?),
        DataType::Utf8 => TypedCol::Utf8(downcast(col, idx)?),
        DataType::Timestamp(TimeUnit::Microsecond, None) => TypedCol::Timestamp(downcast(col, idx)?),
        DataType::Timestamp(TimeUnit::Microsecond, Some(_)) => {
            TypedCol::TimestampTz(downcast(col, idx)?)
        }
        DataType::Date32 => TypedCol::Date32(downcast(col, idx)?),
        DataType::Binary => TypedCol::Binary(downcast(col, idx)?),
        _ => TypedCol::Null,
    })
}

fn opt<A: Array, T>(arr: &A, row: usize, value: impl FnOnce(&A) -> T) -> Option<T> {
    if arr.is_null(row) {
        None
    } else {
        Some(value(arr))
    }
}

fn sql_value(col: &TypedCol<'_>, row: usize) -> SqlValue {
    match col {
        TypedCol::Null => SqlValue::Null,
        TypedCol::Int16(arr) => SqlValue::Int16(opt(*arr, row, |a| a.value(row))),
        TypedCol::Int32(arr) => SqlValue::Int32(opt(*arr, row, |a| a.value(row))),
        TypedCol::Int64(arr) => SqlValue::Int64(opt(*arr, row, |a| a.value(row))),
        TypedCol::Float32(arr) => SqlValue::Float32(opt(*arr, row, |a| a.value(row))),
        TypedCol::Float64(arr) => SqlValue::Float64(opt(*arr, row, |a| a.value(row))),
        TypedCol::Boolean(arr) => SqlValue::Bool(opt(*arr, row, |a| a.value(row))),
        TypedCol::Utf8(arr) => SqlValue::Text(opt(*arr, row, |a| a.value(row).to_owned())),
        TypedCol::Timestamp(arr) => {
            SqlValue::Timestamp(opt(*arr, row, |a| a.value_as_datetime(row)).flatten())
        }
        TypedCol::TimestampTz(arr) => SqlValue::TimestampTz(
            opt(*arr, row, |a| a.value_as_datetime(row))
                .flatten()
                .map(|ts| ts.and_utc()),
        ),
        TypedCol::Date32(arr) => SqlValue::Date(opt(*arr, row, |a| a.value_as_date(row)).flatten()),
        TypedCol::Binary(arr) => SqlValue::Bytes(opt(*arr, row, |a| a.value(row).to_vec())),
    }
}

/// Decode every row of `batch` into SQL values, in column order.
///
/// # Errors
///
/// Returns [`WriteError::Decode`] if a column cannot be cast to its
/// bindable type.
pub fn decode_rows(batch: &RecordBatch) -> Result<Vec<Vec<SqlValue>>, WriteError> {
    let columns = batch
        .columns()
        .iter()
        .map(|col| {
            let target = bindable_type(col.data_type());
            if &target == col.data_type() {
                Ok(col.clone())
            } else {
                cast(col.as_ref(), &target)
            }
        })
        .collect::<Result<Vec<ArrayRef>, _>>()?;

    let typed = columns
        .iter()
        .enumerate()
        .map(|(idx, col)| typed_col(col, idx))
        .collect::<Result<Vec<_>, _>>()?;

    Ok((0..batch.num_rows())
        .map(|row| typed.iter().map(|col| sql_value(col, row)).collect())
        .collect())
}
