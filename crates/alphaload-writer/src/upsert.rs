//! Idempotent, retried UPSERT of cleaned batches.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::db::DbManager;
use crate::decode::decode_rows;
use crate::error::{DbError, WriteError};
use crate::statement::{QualifiedTable, UpsertStatement};
use crate::value::SqlValue;

const BACKOFF_MAX_SECS: f64 = 60.0;
const KEY_SEPARATOR: char = '\u{1f}';

/// How rows that collide on the primary key are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Overwrite every non-key column with the incoming value.
    #[default]
    Replace,
    /// Column-wise merge. Recognized but not supported.
    Merge,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace => f.write_str("replace"),
            Self::Merge => f.write_str("merge"),
        }
    }
}

impl FromStr for ConflictStrategy {
    type Err = WriteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replace" => Ok(Self::Replace),
            "merge" => Ok(Self::Merge),
            other => Err(WriteError::UnsupportedStrategy(other.to_string())),
        }
    }
}

/// Sub-batching and retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Rows per transaction.
    pub batch_size: usize,
    /// Retries per sub-batch after the first attempt.
    pub max_retries: u32,
    /// Retry `n` (0-based) waits `retry_base^(n+1)` seconds, capped at 60.
    pub retry_base: f64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            max_retries: 3,
            retry_base: 2.0,
        }
    }
}

/// Delay before retry number `attempt` (0-based).
#[must_use]
pub fn retry_delay(retry_base: f64, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt.saturating_add(1)).unwrap_or(i32::MAX);
    let secs = retry_base.powi(exponent);
    let secs = if secs.is_finite() {
        secs.clamp(0.0, BACKOFF_MAX_SECS)
    } else {
        BACKOFF_MAX_SECS
    };
    Duration::from_secs_f64(secs)
}

/// Writes cleaned batches into the clean layer.
#[derive(Clone)]
pub struct CleanLayerWriter {
    db: Arc<dyn DbManager>,
    config: WriterConfig,
}

impl fmt::Debug for CleanLayerWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanLayerWriter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CleanLayerWriter {
    #[must_use]
    pub fn new(db: Arc<dyn DbManager>, config: WriterConfig) -> Self {
        Self { db, config }
    }

    #[must_use]
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    #[must_use]
    pub fn db(&self) -> &Arc<dyn DbManager> {
        &self.db
    }

    /// UPSERT `batch` into `table`. Returns rows written.
    ///
    /// # Errors
    ///
    /// See [`CleanLayerWriter::upsert_cancellable`].
    pub async fn upsert(
        &self,
        batch: &RecordBatch,
        table: &QualifiedTable,
        primary_keys: &[String],
        strategy: ConflictStrategy,
    ) -> Result<u64, WriteError> {
        self.upsert_cancellable(batch, table, primary_keys, strategy, &CancellationToken::new())
            .await
    }

    /// UPSERT `batch` into `table` in sub-batches of `batch_size` rows, each
    /// in its own transaction, retrying a failed sub-batch as a whole.
    ///
    /// `cancel` is checked before each sub-batch and interrupts retry sleeps.
    /// A statement already sent to the database is never interrupted.
    /// Rows with a null key value are skipped, and within a sub-batch only
    /// the last row per key is sent.
    ///
    /// # Errors
    ///
    /// - [`WriteError::UnsupportedStrategy`] for [`ConflictStrategy::Merge`].
    /// - [`WriteError::InvalidArgument`] for missing keys or a zero batch size.
    /// - [`WriteError::RetriesExhausted`] when one sub-batch keeps failing;
    ///   earlier sub-batches stay committed.
    /// - [`WriteError::Rejected`] when the database refuses a sub-batch's
    ///   rows. Those are not retried.
    /// - [`WriteError::Cancelled`] when `cancel` fires between sub-batches.
    pub async fn upsert_cancellable(
        &self,
        batch: &RecordBatch,
        table: &QualifiedTable,
        primary_keys: &[String],
        strategy: ConflictStrategy,
        cancel: &CancellationToken,
    ) -> Result<u64, WriteError> {
        if strategy != ConflictStrategy::Replace {
            return Err(WriteError::UnsupportedStrategy(strategy.to_string()));
        }
        if self.config.batch_size == 0 {
            return Err(WriteError::InvalidArgument("batch_size must be > 0".into()));
        }
        if primary_keys.is_empty() {
            return Err(WriteError::InvalidArgument(
                "upsert requires at least one primary key column".into(),
            ));
        }
        let schema = batch.schema();
        let missing: Vec<&str> = primary_keys
            .iter()
            .filter(|k| schema.index_of(k).is_err())
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(WriteError::InvalidArgument(format!(
                "primary key columns missing from batch: {}",
                missing.join(", ")
            )));
        }
        if batch.num_rows() == 0 {
            return Ok(0);
        }

        let statement = UpsertStatement::new(
            table.clone(),
            schema.fields().iter().map(|f| f.name().clone()).collect(),
            primary_keys.to_vec(),
        );
        let key_positions: Vec<usize> = primary_keys
            .iter()
            .filter_map(|k| schema.index_of(k).ok())
            .collect();

        let mut written: u64 = 0;
        let mut skipped: usize = 0;
        let total = batch.num_rows();
        for (sub_batch, offset) in (0..total).step_by(self.config.batch_size).enumerate() {
            if cancel.is_cancelled() {
                return Err(WriteError::Cancelled {
                    committed_rows: written,
                });
            }
            let len = self.config.batch_size.min(total - offset);
            let prepared = unique_keyed_rows(decode_rows(&batch.slice(offset, len))?, &key_positions);
            if prepared.null_keys > 0 {
                tracing::warn!(
                    table = %table,
                    sub_batch,
                    rows = prepared.null_keys,
                    "skipping rows with a null primary key value"
                );
            }
            if prepared.duplicates > 0 {
                tracing::debug!(
                    table = %table,
                    sub_batch,
                    rows = prepared.duplicates,
                    "collapsed repeated keys, keeping the last row"
                );
            }
            skipped += prepared.null_keys;
            if prepared.rows.is_empty() {
                continue;
            }
            written += self
                .write_with_retry(&statement, &prepared.rows, sub_batch, written, cancel)
                .await?;
        }

        tracing::info!(table = %table, rows = written, skipped, "upsert complete");
        Ok(written)
    }

    async fn write_with_retry(
        &self,
        statement: &UpsertStatement,
        rows: &[Vec<SqlValue>],
        sub_batch: usize,
        committed_rows: u64,
        cancel: &CancellationToken,
    ) -> Result<u64, WriteError> {
        let max_retries = self.config.max_retries;
        let mut attempt = 0u32;
        loop {
            match self.write_once(statement, rows).await {
                Ok(count) => {
                    tracing::debug!(
                        table = %statement.table,
                        sub_batch,
                        rows = count,
                        attempt = attempt + 1,
                        "sub-batch committed"
                    );
                    return Ok(count);
                }
                Err(err) if !err.is_retryable() => {
                    tracing::error!(
                        table = %statement.table,
                        sub_batch,
                        error = %err,
                        "sub-batch rejected, not retrying"
                    );
                    return Err(WriteError::Rejected {
                        sub_batch,
                        source: err,
                    });
                }
                Err(err) if attempt < max_retries => {
                    let delay = retry_delay(self.config.retry_base, attempt);
                    #[allow(clippy::cast_possible_truncation)]
                    let delay_ms = delay.as_millis() as u64;
                    tracing::warn!(
                        table = %statement.table,
                        sub_batch,
                        attempt = attempt + 1,
                        max_retries,
                        delay_ms,
                        error = %err,
                        "sub-batch write failed, will retry"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => {
                            return Err(WriteError::Cancelled { committed_rows });
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(
                        table = %statement.table,
                        sub_batch,
                        attempts = attempt + 1,
                        error = %err,
                        "sub-batch write failed, retries exhausted"
                    );
                    return Err(WriteError::RetriesExhausted {
                        sub_batch,
                        attempts: attempt + 1,
                        source: err,
                    });
                }
            }
        }
    }

    async fn write_once(
        &self,
        statement: &UpsertStatement,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, DbError> {
        let mut tx = self.db.transaction().await?;
        match tx.upsert(statement, rows).await {
            Ok(count) => {
                tx.commit().await?;
                Ok(count)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback after failed upsert failed");
                }
                Err(err)
            }
        }
    }
}

/// Rows of one statement after key checks.
#[derive(Debug, Default)]
struct KeyedRows {
    rows: Vec<Vec<SqlValue>>,
    null_keys: usize,
    duplicates: usize,
}

/// Drop rows with a null key value and keep only the last row per key, so a
/// single `ON CONFLICT DO UPDATE` never touches the same row twice.
fn unique_keyed_rows(rows: Vec<Vec<SqlValue>>, key_positions: &[usize]) -> KeyedRows {
    let total = rows.len();
    let mut null_keys = 0;
    let mut keyed = Vec::with_capacity(total);
    for row in rows {
        if key_positions
            .iter()
            .any(|&pos| row.get(pos).map_or(true, SqlValue::is_null))
        {
            null_keys += 1;
            continue;
        }
        let key = key_positions
            .iter()
            .map(|&pos| row[pos].to_string())
            .collect::<Vec<_>>()
            .join(&KEY_SEPARATOR.to_string());
        keyed.push((key, row));
    }

    let mut seen = HashSet::with_capacity(keyed.len());
    let mut kept: Vec<Vec<SqlValue>> = keyed
        .into_iter()
        .rev()
        .filter_map(|(key, row)| seen.insert(key).then_some(row))
        .collect();
    kept.reverse();

    KeyedRows {
        duplicates: total - null_keys - kept.len(),
        rows: kept,
        null_keys,
    }
}
