//! The fixed four-stage clean pipeline.

use std::sync::Arc;

use alphaload_types::{TableSchema, ValidationResult};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::aligner::{align_date, align_identifier, build_primary_key, DateOutput, SecurityMaster};
use crate::columns::{detect_dropped_columns, null_key_count, row_keys};
use crate::error::CleanError;
use crate::lineage::add_lineage;
use crate::standardizer::{MonetaryUnit, Standardizer, VolumeUnit};
use crate::validator::{apply_validation_flag, validate};

/// What to do with a batch that fails validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Reject the batch with [`CleanError::Rejected`].
    #[default]
    Abort,
    /// Keep going and mark rows in `_validation_flag`.
    Flag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateAlignment {
    pub column: String,
    #[serde(default)]
    pub output: DateOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierAlignment {
    pub column: String,
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonetaryConversion {
    pub columns: Vec<String>,
    pub unit: MonetaryUnit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConversion {
    pub columns: Vec<String>,
    pub unit: VolumeUnit,
}

fn default_true() -> bool {
    true
}

/// Per-task configuration of the align and standardize stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanConfig {
    #[serde(default)]
    pub date: Option<DateAlignment>,
    #[serde(default)]
    pub identifier: Option<IdentifierAlignment>,
    #[serde(default)]
    pub monetary: Vec<MonetaryConversion>,
    #[serde(default)]
    pub volume: Vec<VolumeConversion>,
    /// Price columns copied to `{col}_unadj` before conversion.
    #[serde(default)]
    pub preserve_unadjusted: Vec<String>,
    #[serde(default = "default_true")]
    pub keep_original_units: bool,
    #[serde(default = "default_true")]
    pub enforce_uniqueness: bool,
    #[serde(default)]
    pub on_invalid: ValidationPolicy,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            date: None,
            identifier: None,
            monetary: Vec::new(),
            volume: Vec::new(),
            preserve_unadjusted: Vec::new(),
            keep_original_units: true,
            enforce_uniqueness: true,
            on_invalid: ValidationPolicy::Abort,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageConfig {
    pub source_tables: Vec<String>,
    #[serde(default)]
    pub data_version: Option<String>,
}

/// A batch that went through every stage, with what the stages observed.
#[derive(Debug, Clone)]
pub struct CleanedBatch {
    pub batch: RecordBatch,
    pub validation: ValidationResult,
    pub unresolved_dates: usize,
    pub unmapped_identifiers: usize,
    /// Rows kept with a null primary key part, which the writer cannot store.
    pub null_key_rows: usize,
}

/// Validator, aligner, standardizer and lineage tracker, run in that order.
///
/// The pipeline is immutable and shared by every concurrent batch of a task.
#[derive(Clone)]
pub struct CleanPipeline {
    schema: Arc<TableSchema>,
    config: CleanConfig,
    lineage: LineageConfig,
    master: Option<Arc<dyn SecurityMaster>>,
}

impl std::fmt::Debug for CleanPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanPipeline")
            .field("schema", &self.schema)
            .field("config", &self.config)
            .field("lineage", &self.lineage)
            .field("security_master", &self.master.is_some())
            .finish()
    }
}

impl CleanPipeline {
    #[must_use]
    pub fn new(schema: Arc<TableSchema>, config: CleanConfig, lineage: LineageConfig) -> Self {
        Self {
            schema,
            config,
            lineage,
            master: None,
        }
    }

    #[must_use]
    pub fn with_security_master(mut self, master: Arc<dyn SecurityMaster>) -> Self {
        self.master = Some(master);
        self
    }

    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Run all four stages on `batch`, tagging lineage with `job_id`.
    ///
    /// # Errors
    ///
    /// - [`CleanError::Rejected`] when validation fails under the abort policy.
    /// - Alignment or standardization errors for missing columns, bad
    ///   configuration or strict identifier mapping.
    /// - [`CleanError::DroppedColumns`] if any stage lost a column.
    pub fn run(&self, batch: &RecordBatch, job_id: &str) -> Result<CleanedBatch, CleanError> {
        let validation = validate(batch, &self.schema);
        let validated = match self.config.on_invalid {
            ValidationPolicy::Abort if !validation.is_valid => {
                return Err(CleanError::Rejected(Box::new(validation)));
            }
            ValidationPolicy::Abort => batch.clone(),
            ValidationPolicy::Flag => apply_validation_flag(batch, &validation)?,
        };
        ensure_columns_kept("validate", batch, &validated)?;

        let (aligned, unresolved_dates, unmapped_identifiers) = self.align(&validated)?;
        ensure_columns_kept("align", &validated, &aligned)?;
        let null_key_rows = if self.schema.primary_keys.is_empty() {
            0
        } else {
            null_key_count(&row_keys(&aligned, &self.schema.primary_keys)?)
        };

        let standardized = self.standardize(&aligned)?;
        ensure_columns_kept("standardize", &aligned, &standardized)?;

        let tagged = add_lineage(
            &standardized,
            &self.lineage.source_tables,
            job_id,
            self.lineage.data_version.as_deref(),
        )?;
        ensure_columns_kept("lineage", &standardized, &tagged)?;

        tracing::debug!(
            job_id,
            rows_in = batch.num_rows(),
            rows_out = tagged.num_rows(),
            duplicates = validation.duplicate_count,
            "batch cleaned"
        );

        Ok(CleanedBatch {
            batch: tagged,
            validation,
            unresolved_dates,
            unmapped_identifiers,
            null_key_rows,
        })
    }

    fn align(&self, batch: &RecordBatch) -> Result<(RecordBatch, usize, usize), CleanError> {
        let mut out = batch.clone();
        let mut unresolved_dates = 0;
        let mut unmapped = 0;

        if let Some(date) = &self.config.date {
            let aligned = align_date(&out, &date.column, date.output)?;
            unresolved_dates = aligned.unresolved;
            out = aligned.batch;
        }
        if let Some(identifier) = &self.config.identifier {
            let aligned = align_identifier(
                &out,
                &identifier.column,
                self.master.as_deref(),
                identifier.strict,
            )?;
            unmapped = aligned.unresolved;
            out = aligned.batch;
        }
        if !self.schema.primary_keys.is_empty() {
            out = build_primary_key(&out, &self.schema.primary_keys, self.config.enforce_uniqueness)?;
        }
        Ok((out, unresolved_dates, unmapped))
    }

    fn standardize(&self, batch: &RecordBatch) -> Result<RecordBatch, CleanError> {
        let standardizer = Standardizer::new(self.config.keep_original_units);
        let mut out = standardizer.preserve_unadjusted(batch, &self.config.preserve_unadjusted)?;
        for conversion in &self.config.monetary {
            out = standardizer.convert_monetary(&out, &conversion.columns, conversion.unit)?;
        }
        for conversion in &self.config.volume {
            out = standardizer.convert_volume(&out, &conversion.columns, conversion.unit)?;
        }
        Ok(out)
    }
}

fn ensure_columns_kept(
    stage: &'static str,
    before: &RecordBatch,
    after: &RecordBatch,
) -> Result<(), CleanError> {
    let columns = detect_dropped_columns(&before.schema(), &after.schema());
    if columns.is_empty() {
        Ok(())
    } else {
        Err(CleanError::DroppedColumns { stage, columns })
    }
}
