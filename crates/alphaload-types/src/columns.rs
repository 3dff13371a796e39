//! Column names the clean layer adds on top of business columns.

/// Source table(s) the row was fetched from.
pub const SOURCE_TABLE: &str = "_source_table";
/// UTC time the row went through the clean pipeline.
pub const PROCESSED_AT: &str = "_processed_at";
/// Data version tag (`YYYYMMDD_HHMMSS` unless supplied).
pub const DATA_VERSION: &str = "_data_version";
/// Identifier of the ingest job that produced the row.
pub const INGEST_JOB_ID: &str = "_ingest_job_id";

/// All lineage columns, in the order they are appended.
pub const LINEAGE_COLUMNS: [&str; 4] = [SOURCE_TABLE, PROCESSED_AT, DATA_VERSION, INGEST_JOB_ID];

/// Marks rows with out-of-range values when validation runs in flag mode.
pub const VALIDATION_FLAG: &str = "_validation_flag";
/// Marks rows whose identifier could not be mapped to a ts_code.
pub const MAPPING_FAILED: &str = "_mapping_failed";

/// Canonical aligned trading date column.
pub const TRADE_DATE: &str = "trade_date";

/// Suffix for columns holding prices before external adjustment.
pub const UNADJUSTED_SUFFIX: &str = "_unadj";

/// Returns `true` for columns added by the clean layer rather than the source.
#[must_use]
pub fn is_system_column(name: &str) -> bool {
    LINEAGE_COLUMNS.contains(&name) || name == VALIDATION_FLAG || name == MAPPING_FAILED
}
