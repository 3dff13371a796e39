//! Clean layer for fetched batches.
//!
//! Every batch goes through the same four stages, in order: schema
//! validation, alignment (dates, identifiers, primary keys), unit
//! standardization and lineage tagging. No stage ever removes a column.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod aligner;
pub mod columns;
pub mod error;
pub mod lineage;
pub mod pipeline;
pub mod standardizer;
pub mod validator;

pub use aligner::{DateOutput, SecurityMaster};
pub use error::CleanError;
pub use pipeline::{CleanConfig, CleanPipeline, CleanedBatch, LineageConfig, ValidationPolicy};
pub use standardizer::{MonetaryUnit, Standardizer, VolumeUnit};
