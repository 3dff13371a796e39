//! Lineage tagging.

use std::sync::Arc;

use alphaload_types::columns::{DATA_VERSION, INGEST_JOB_ID, PROCESSED_AT, SOURCE_TABLE};
use arrow::array::{ArrayRef, StringArray, TimestampMicrosecondArray};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};

use crate::columns::upsert_column;
use crate::error::CleanError;

const VERSION_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Auto-generated data version for `at`: `YYYYMMDD_HHMMSS` in UTC.
#[must_use]
pub fn auto_version(at: DateTime<Utc>) -> String {
    at.format(VERSION_FORMAT).to_string()
}

/// Stamp every row with the four lineage columns, timestamped now.
///
/// # Errors
///
/// See [`add_lineage_at`].
pub fn add_lineage(
    batch: &RecordBatch,
    source_tables: &[String],
    job_id: &str,
    data_version: Option<&str>,
) -> Result<RecordBatch, CleanError> {
    add_lineage_at(batch, source_tables, job_id, data_version, Utc::now())
}

/// Stamp every row with `_source_table`, `_processed_at`, `_data_version`
/// and `_ingest_job_id`.
///
/// Multiple source tables are recorded comma-joined. Existing lineage columns
/// are overwritten in place.
///
/// # Errors
///
/// Returns [`CleanError::InvalidArgument`] if `source_tables` is empty or
/// contains a blank name, or if `job_id` is blank.
pub fn add_lineage_at(
    batch: &RecordBatch,
    source_tables: &[String],
    job_id: &str,
    data_version: Option<&str>,
    processed_at: DateTime<Utc>,
) -> Result<RecordBatch, CleanError> {
    if source_tables.is_empty() || source_tables.iter().any(|t| t.trim().is_empty()) {
        return Err(CleanError::InvalidArgument(
            "lineage requires at least one non-empty source table".into(),
        ));
    }
    if job_id.trim().is_empty() {
        return Err(CleanError::InvalidArgument(
            "lineage requires a non-empty ingest job id".into(),
        ));
    }

    let rows = batch.num_rows();
    let source = source_tables.join(",");
    let version = match data_version {
        Some(v) if !v.trim().is_empty() => v.to_owned(),
        _ => auto_version(processed_at),
    };
    let micros = processed_at.timestamp_micros();

    let columns: [(&str, ArrayRef); 4] = [
        (SOURCE_TABLE, Arc::new(StringArray::from(vec![source.as_str(); rows]))),
        (
            PROCESSED_AT,
            Arc::new(TimestampMicrosecondArray::from(vec![micros; rows]).with_timezone("UTC")),
        ),
        (DATA_VERSION, Arc::new(StringArray::from(vec![version.as_str(); rows]))),
        (INGEST_JOB_ID, Arc::new(StringArray::from(vec![job_id; rows]))),
    ];

    let mut out = batch.clone();
    for (name, array) in columns {
        out = upsert_column(&out, name, array)?;
    }
    Ok(out)
}
