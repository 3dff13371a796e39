//! Alignment stage: canonical trade dates, `CODE.EXCHANGE` identifiers and
//! composite-key uniqueness.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

use alphaload_types::columns::{MAPPING_FAILED, TRADE_DATE};
use arrow::array::{Array, ArrayRef, BooleanArray, Date32Array, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::columns::{dedup_keep_last, missing_columns, upsert_column};
use crate::error::CleanError;

/// Days between 0001-01-01 (CE day 1) and the Unix epoch.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

static SUFFIXED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{6})\.(SH|SZ|BJ)$").expect("valid regex"));

static PREFIXED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(SH|SZ|BJ)(\d{6})$").expect("valid regex"));

static BARE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,6}$").expect("valid regex"));

/// Representation of the canonical `trade_date` column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateOutput {
    /// `Int64` holding `YYYYMMDD`.
    #[default]
    Int,
    /// Arrow `Date32`.
    Date,
}

/// A batch after an alignment step, with the count of values that could not
/// be resolved and were degraded to null or marked.
#[derive(Debug, Clone)]
pub struct Aligned {
    pub batch: RecordBatch,
    pub unresolved: usize,
}

/// External lookup from a raw identifier to its `CODE.EXCHANGE` form.
pub trait SecurityMaster: Send + Sync {
    fn lookup(&self, identifier: &str) -> Option<String>;
}

impl SecurityMaster for HashMap<String, String> {
    fn lookup(&self, identifier: &str) -> Option<String> {
        self.get(identifier).cloned()
    }
}

impl SecurityMaster for BTreeMap<String, String> {
    fn lookup(&self, identifier: &str) -> Option<String> {
        self.get(identifier).cloned()
    }
}

fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

fn date_to_yyyymmdd(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 10_000 + i64::from(date.month()) * 100 + i64::from(date.day())
}

/// Interpret an integer as `YYYYMMDD`.
#[must_use]
pub fn parse_yyyymmdd_int(value: i64) -> Option<NaiveDate> {
    let year = i32::try_from(value / 10_000).ok()?;
    let month = u32::try_from((value / 100) % 100).ok()?;
    let day = u32::try_from(value % 100).ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parse the textual date forms seen in upstream payloads.
#[must_use]
pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    for fmt in ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return Some(date);
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(ts.date());
        }
    }
    DateTime::parse_from_rfc3339(text).ok().map(|ts| ts.date_naive())
}

fn source_dates(array: &ArrayRef, column: &str) -> Result<Vec<Option<NaiveDate>>, CleanError> {
    let rows = array.len();
    match array.data_type() {
        DataType::Null => Ok(vec![None; rows]),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            let text = cast(array.as_ref(), &DataType::Utf8)?;
            let text = downcast::<StringArray>(&text, column)?;
            Ok(text.iter().map(|v| v.and_then(parse_date_text)).collect())
        }
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => {
            let ints = cast(array.as_ref(), &DataType::Int64)?;
            let ints = downcast::<Int64Array>(&ints, column)?;
            Ok(ints.iter().map(|v| v.and_then(parse_yyyymmdd_int)).collect())
        }
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _) => {
            let days = cast(array.as_ref(), &DataType::Date32)?;
            let days = downcast::<Date32Array>(&days, column)?;
            Ok((0..rows)
                .map(|row| {
                    if days.is_null(row) {
                        None
                    } else {
                        days.value_as_date(row)
                    }
                })
                .collect())
        }
        other => Err(CleanError::Alignment(format!(
            "column '{column}' has unsupported date type {other}"
        ))),
    }
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, column: &str) -> Result<&'a T, CleanError> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        CleanError::Alignment(format!("column '{column}' could not be read after cast"))
    })
}

/// Derive the canonical `trade_date` column from `source_col`.
///
/// Values that cannot be parsed become null and are counted in
/// [`Aligned::unresolved`]; no row is ever dropped. When `source_col` is
/// `trade_date` itself the column is replaced in place.
///
/// # Errors
///
/// Returns [`CleanError::Alignment`] if the column is missing or has a type
/// that cannot carry dates.
pub fn align_date(
    batch: &RecordBatch,
    source_col: &str,
    output: DateOutput,
) -> Result<Aligned, CleanError> {
    let array = batch.column_by_name(source_col).ok_or_else(|| {
        CleanError::Alignment(format!("date column '{source_col}' not found"))
    })?;

    let dates = source_dates(array, source_col)?;
    let unresolved = dates
        .iter()
        .enumerate()
        .filter(|(row, date)| date.is_none() && array.is_valid(*row))
        .count();

    let aligned: ArrayRef = match output {
        DateOutput::Int => Arc::new(
            dates
                .iter()
                .map(|d| d.map(date_to_yyyymmdd))
                .collect::<Int64Array>(),
        ),
        DateOutput::Date => Arc::new(
            dates
                .iter()
                .map(|d| d.map(date_to_days))
                .collect::<Date32Array>(),
        ),
    };

    if unresolved > 0 {
        tracing::warn!(
            column = source_col,
            unresolved,
            rows = batch.num_rows(),
            "unparsable dates set to null"
        );
    }

    Ok(Aligned {
        batch: upsert_column(batch, TRADE_DATE, aligned)?,
        unresolved,
    })
}

/// Two-digit prefixes no exchange lists securities under.
const RESERVED_PREFIXES: &[&str] = &["99"];

fn exchange_for(code: &str) -> Option<&'static str> {
    let prefix = code.get(..2)?;
    if RESERVED_PREFIXES.contains(&prefix) {
        return None;
    }
    match prefix.as_bytes() {
        // 920xxx is the Beijing series; other 9xxxxx codes are Shanghai B-shares.
        b"92" => Some("BJ"),
        [b'6' | b'9', _] => Some("SH"),
        [b'0' | b'2' | b'3', _] => Some("SZ"),
        [b'4' | b'8', _] => Some("BJ"),
        _ => None,
    }
}

/// Normalize an identifier to `CODE.EXCHANGE` using exchange prefix rules.
///
/// Accepts `600000`, `600000.SH` and `sh600000` (case-insensitive). Returns
/// `None` when no rule applies.
#[must_use]
pub fn normalize_code(raw: &str) -> Option<String> {
    let upper = raw.trim().to_ascii_uppercase();
    if SUFFIXED_CODE.is_match(&upper) {
        return Some(upper);
    }
    if let Some(caps) = PREFIXED_CODE.captures(&upper) {
        return Some(format!("{}.{}", &caps[2], &caps[1]));
    }
    if BARE_CODE.is_match(&upper) {
        let code = format!("{upper:0>6}");
        let exchange = exchange_for(&code)?;
        return Some(format!("{code}.{exchange}"));
    }
    None
}

fn source_identifiers(array: &ArrayRef, column: &str) -> Result<Vec<Option<String>>, CleanError> {
    match array.data_type() {
        DataType::Null => Ok(vec![None; array.len()]),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            let text = cast(array.as_ref(), &DataType::Utf8)?;
            let text = downcast::<StringArray>(&text, column)?;
            Ok(text.iter().map(|v| v.map(str::to_owned)).collect())
        }
        dt if dt.is_integer() => {
            let ints = cast(array.as_ref(), &DataType::Int64)?;
            let ints = downcast::<Int64Array>(&ints, column)?;
            Ok(ints.iter().map(|v| v.map(|n| format!("{n:06}"))).collect())
        }
        other => Err(CleanError::Alignment(format!(
            "column '{column}' has unsupported identifier type {other}"
        ))),
    }
}

/// Rewrite `source_col` to `CODE.EXCHANGE` form and add `_mapping_failed`.
///
/// Prefix rules are tried first, then the optional security master. A value
/// that neither resolves keeps its original text and gets
/// `_mapping_failed = true`. Null identifiers count as failed.
///
/// # Errors
///
/// Returns [`CleanError::Alignment`] if the column is missing, or if `strict`
/// is set and any identifier failed to map.
pub fn align_identifier(
    batch: &RecordBatch,
    source_col: &str,
    master: Option<&dyn SecurityMaster>,
    strict: bool,
) -> Result<Aligned, CleanError> {
    let array = batch.column_by_name(source_col).ok_or_else(|| {
        CleanError::Alignment(format!("identifier column '{source_col}' not found"))
    })?;

    let raw = source_identifiers(array, source_col)?;
    let mut mapped: Vec<Option<String>> = Vec::with_capacity(raw.len());
    let mut failed: Vec<bool> = Vec::with_capacity(raw.len());
    let mut first_failure: Option<String> = None;

    for value in raw {
        let Some(value) = value else {
            mapped.push(None);
            failed.push(true);
            continue;
        };
        let resolved = normalize_code(&value).or_else(|| master.and_then(|m| m.lookup(&value)));
        if let Some(code) = resolved {
            mapped.push(Some(code));
            failed.push(false);
        } else {
            first_failure.get_or_insert_with(|| value.clone());
            mapped.push(Some(value));
            failed.push(true);
        }
    }

    let unresolved = failed.iter().filter(|f| **f).count();
    if unresolved > 0 {
        if strict {
            return Err(CleanError::Alignment(format!(
                "{unresolved} identifier(s) in '{source_col}' could not be mapped (first: {})",
                first_failure.as_deref().unwrap_or("null")
            )));
        }
        tracing::warn!(
            column = source_col,
            unresolved,
            rows = batch.num_rows(),
            "identifiers left unmapped"
        );
    }

    let codes: ArrayRef = Arc::new(mapped.into_iter().collect::<StringArray>());
    let flags: ArrayRef = Arc::new(BooleanArray::from(failed));
    let batch = upsert_column(batch, source_col, codes)?;
    let batch = upsert_column(&batch, MAPPING_FAILED, flags)?;
    Ok(Aligned { batch, unresolved })
}

/// Check the composite key columns and, when `enforce_uniqueness` is set,
/// drop repeated keys keeping the last row.
///
/// # Errors
///
/// Returns [`CleanError::Alignment`] if a key column is missing.
pub fn build_primary_key(
    batch: &RecordBatch,
    keys: &[String],
    enforce_uniqueness: bool,
) -> Result<RecordBatch, CleanError> {
    let absent = missing_columns(batch, keys);
    if !absent.is_empty() {
        return Err(CleanError::Alignment(format!(
            "primary key columns missing: {}",
            absent.join(", ")
        )));
    }
    if !enforce_uniqueness || keys.is_empty() {
        return Ok(batch.clone());
    }
    let (deduped, removed) = dedup_keep_last(batch, keys)?;
    if removed > 0 {
        tracing::info!(removed, keys = %keys.join(","), "removed duplicate key rows");
    }
    Ok(deduped)
}
