//! Outcome of validating one fetched batch against its table schema.

use std::collections::{BTreeMap, BTreeSet};

/// Findings of the schema validator for one batch. Computed fresh per batch.
///
/// Missing columns, type errors and nulls in non-nullable columns are fatal
/// and clear `is_valid`. Out-of-range rows and duplicate keys are recorded
/// but leave the batch valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub missing_columns: Vec<String>,
    pub type_errors: BTreeMap<String, String>,
    pub null_fields: Vec<String>,
    pub out_of_range_rows: BTreeSet<usize>,
    pub dropped_columns: Vec<String>,
    pub duplicate_count: usize,
}

impl ValidationResult {
    /// A passing result with no findings.
    #[must_use]
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            ..Self::default()
        }
    }

    /// One-line human readable summary of the findings.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.missing_columns.is_empty() {
            parts.push(format!("missing columns: {}", self.missing_columns.join(", ")));
        }
        if !self.type_errors.is_empty() {
            let errors = self
                .type_errors
                .iter()
                .map(|(col, msg)| format!("{col} ({msg})"))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("type errors: {errors}"));
        }
        if !self.null_fields.is_empty() {
            parts.push(format!("nulls in non-nullable columns: {}", self.null_fields.join(", ")));
        }
        if !self.out_of_range_rows.is_empty() {
            parts.push(format!("{} out-of-range row(s)", self.out_of_range_rows.len()));
        }
        if self.duplicate_count > 0 {
            parts.push(format!("{} duplicate key row(s)", self.duplicate_count));
        }
        if parts.is_empty() {
            "ok".to_owned()
        } else {
            parts.join("; ")
        }
    }
}
