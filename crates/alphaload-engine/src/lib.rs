//! Batch planning and concurrent execution for alphaload ingestion tasks.
//!
//! A task is planned into parameter records by a [`BatchPlanner`] (source,
//! partition strategy, map strategy), then run by the [`ExecutionEngine`]
//! under a concurrency limit. Each record goes through fetch, the clean
//! pipeline and the clean-layer writer inside an [`IngestTask`].

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod errors;
pub mod execution;
pub mod mapping;
pub mod partition;
pub mod planner;
pub mod source;
pub mod task;

pub use errors::PlanError;
pub use execution::{aggregate, ExecutionEngine, RunPhase};
pub use mapping::{DateRangeMap, JoinedEntityMap, MapStrategy, SingleEntityMap};
pub use partition::{BySize, PartitionStrategy, SmartTimePartition};
pub use planner::{incremental_start, latest_loaded_date, BatchPlanner};
pub use source::{CalendarDaysSource, DataFetcher, DateRangeSource, ItemSource, QuerySource, StaticSource};
pub use task::IngestTask;
