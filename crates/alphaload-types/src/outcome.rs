//! Per-batch outcomes and the aggregated task result.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stage of the per-batch pipeline where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStage {
    Fetch,
    Clean,
    Write,
    /// The batch task itself panicked or could not be joined.
    Task,
}

impl fmt::Display for BatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fetch => "fetch",
            Self::Clean => "clean",
            Self::Write => "write",
            Self::Task => "task",
        };
        f.write_str(s)
    }
}

/// Why one batch failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub stage: BatchStage,
    pub message: String,
}

impl BatchFailure {
    #[must_use]
    pub fn new(stage: BatchStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.message)
    }
}

/// Result of executing one parameter record.
///
/// `Success(0)` is a failure for aggregation purposes: a batch that fetched
/// rows but wrote none lost data. A batch with legitimately nothing to load
/// reports `NoData` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Success(u64),
    NoData,
    Failure(BatchFailure),
    Cancelled,
}

impl BatchOutcome {
    #[must_use]
    pub fn failure(stage: BatchStage, message: impl Into<String>) -> Self {
        Self::Failure(BatchFailure::new(stage, message))
    }

    /// Returns `true` for outcomes that count towards `failed_batches`.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failure(_) | Self::Cancelled | Self::Success(0))
    }
}

/// Overall status of one task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    PartialSuccess,
    Failed,
    Cancelled,
    NoData,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::NoData => "no_data",
        };
        f.write_str(s)
    }
}

/// Aggregated result of a task run, returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub rows: u64,
    pub failed_batches: u64,
    pub message: String,
}

impl TaskResult {
    /// Result for a run that was cancelled before any batch started.
    #[must_use]
    pub fn cancelled_before_start() -> Self {
        Self {
            status: TaskStatus::Cancelled,
            rows: 0,
            failed_batches: 0,
            message: "cancelled before any batch started".to_owned(),
        }
    }

    /// Result for a run that failed before or during batch planning.
    #[must_use]
    pub fn planning_failed(planned_batches: u64, message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            rows: 0,
            failed_batches: planned_batches,
            message: message.into(),
        }
    }

    /// Returns `true` if at least part of the data was loaded or there was
    /// nothing to load.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Success | TaskStatus::PartialSuccess | TaskStatus::NoData
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_row_success_counts_as_failed() {
        assert!(BatchOutcome::Success(0).is_failed());
        assert!(!BatchOutcome::Success(3).is_failed());
        assert!(!BatchOutcome::NoData.is_failed());
        assert!(BatchOutcome::Cancelled.is_failed());
        assert!(BatchOutcome::failure(BatchStage::Fetch, "timeout").is_failed());
    }

    #[test]
    fn partial_loads_are_ok_failures_are_not() {
        let result = |status| TaskResult {
            status,
            rows: 0,
            failed_batches: 0,
            message: String::new(),
        };
        assert!(result(TaskStatus::Success).is_ok());
        assert!(result(TaskStatus::PartialSuccess).is_ok());
        assert!(result(TaskStatus::NoData).is_ok());
        assert!(!result(TaskStatus::Failed).is_ok());
        assert!(!result(TaskStatus::Cancelled).is_ok());
        assert!(!TaskResult::planning_failed(0, "bad range").is_ok());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::PartialSuccess).unwrap();
        assert_eq!(json, "\"partial_success\"");
        assert_eq!(TaskStatus::NoData.to_string(), "no_data");
    }

    #[test]
    fn failure_display_includes_stage() {
        let failure = BatchFailure::new(BatchStage::Write, "retries exhausted");
        assert_eq!(failure.to_string(), "[write] retries exhausted");
    }
}
