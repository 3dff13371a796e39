//! Shared alphaload model types: batch parameters, outcomes, table schemas
//! and validation results.
//!
//! This crate is dependency-light so the planner, clean pipeline and writer
//! can all share it without pulling in each other.

#![warn(clippy::pedantic)]

pub mod columns;
pub mod outcome;
pub mod param;
pub mod schema;
pub mod validation;

pub use outcome::{BatchFailure, BatchOutcome, BatchStage, TaskResult, TaskStatus};
pub use param::{ParamRecord, ParamValue};
pub use schema::{ColumnType, TableSchema, ValueRange};
pub use validation::ValidationResult;
