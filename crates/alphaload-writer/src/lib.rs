//! Clean-layer persistence.
//!
//! [`CleanLayerWriter`] splits a cleaned batch into sub-batches and UPSERTs
//! each one in its own transaction through a [`DbManager`]. Two managers are
//! provided: [`PgDatabase`] over `tokio-postgres`, and [`MemoryDatabase`]
//! for tests and dry runs.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod ddl;
pub mod decode;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod statement;
pub mod upsert;
pub mod value;

pub use config::PgConfig;
pub use db::{DbManager, DbTransaction};
pub use error::{DbError, WriteError};
pub use memory::MemoryDatabase;
pub use postgres::PgDatabase;
pub use statement::{QualifiedTable, TableDefinition, UpsertStatement};
pub use upsert::{CleanLayerWriter, ConflictStrategy, WriterConfig};
pub use value::SqlValue;
