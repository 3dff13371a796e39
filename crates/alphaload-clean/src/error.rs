//! Clean pipeline error types.

use alphaload_types::ValidationResult;
use arrow::error::ArrowError;

/// Errors produced by clean-pipeline stages.
///
/// Data-content problems (unparsable dates, unmappable identifiers) are not
/// errors; they degrade to marker columns and warnings. These variants cover
/// configuration mistakes, missing columns and explicit strict-mode failures.
#[derive(Debug, thiserror::Error)]
pub enum CleanError {
    /// A column needed for alignment is missing, or strict mode rejected a value.
    #[error("alignment error: {0}")]
    Alignment(String),

    /// A conversion targets a missing or non-numeric column.
    #[error("standardization error: {0}")]
    Standardization(String),

    /// Invalid caller-supplied argument (e.g. empty lineage job id).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The batch failed validation and the pipeline runs in abort mode.
    #[error("batch rejected by validation: {}", .0.summary())]
    Rejected(Box<ValidationResult>),

    /// A stage returned fewer columns than it received.
    #[error("stage '{stage}' dropped columns: {}", .columns.join(", "))]
    DroppedColumns {
        stage: &'static str,
        columns: Vec<String>,
    },

    /// Underlying Arrow kernel failure.
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
}
