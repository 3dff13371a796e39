//! One ingestion task: fetch, clean and write each planned batch.

use std::collections::BTreeSet;
use std::sync::Arc;

use alphaload_clean::CleanPipeline;
use alphaload_types::{BatchOutcome, BatchStage, ParamRecord, TaskResult};
use alphaload_writer::ddl::ensure_table;
use alphaload_writer::{CleanLayerWriter, ConflictStrategy, DbManager, QualifiedTable, WriteError};
use arrow::record_batch::RecordBatch;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::TaskConfig;
use crate::errors::PlanError;
use crate::execution::ExecutionEngine;
use crate::source::DataFetcher;

/// Everything needed to process one parameter record end to end.
///
/// Shared by all concurrent batches of the task; only the set of columns
/// already ensured on the destination table is mutable.
pub struct IngestTask {
    name: String,
    job_id: String,
    fetcher: Arc<dyn DataFetcher>,
    pipeline: CleanPipeline,
    writer: CleanLayerWriter,
    table: QualifiedTable,
    primary_keys: Vec<String>,
    strategy: ConflictStrategy,
    ensured_columns: Mutex<BTreeSet<String>>,
}

impl std::fmt::Debug for IngestTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestTask")
            .field("name", &self.name)
            .field("job_id", &self.job_id)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl IngestTask {
    pub fn new(
        name: impl Into<String>,
        job_id: impl Into<String>,
        fetcher: Arc<dyn DataFetcher>,
        pipeline: CleanPipeline,
        writer: CleanLayerWriter,
        table: QualifiedTable,
        primary_keys: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            job_id: job_id.into(),
            fetcher,
            pipeline,
            writer,
            table,
            primary_keys,
            strategy: ConflictStrategy::Replace,
            ensured_columns: Mutex::new(BTreeSet::new()),
        }
    }

    /// Wire a task from its configuration, writing through `db`.
    pub fn from_config(
        config: &TaskConfig,
        job_id: impl Into<String>,
        fetcher: Arc<dyn DataFetcher>,
        db: Arc<dyn DbManager>,
    ) -> Self {
        let pipeline = CleanPipeline::new(
            Arc::new(config.table_schema()),
            config.clean.clone(),
            config.lineage.clone(),
        );
        let writer = CleanLayerWriter::new(db, config.writer_config());
        Self::new(
            config.task.clone(),
            job_id,
            fetcher,
            pipeline,
            writer,
            config.destination_table(),
            config.primary_keys.clone(),
        )
        .with_conflict_strategy(config.on_conflict)
    }

    #[must_use]
    pub fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn table(&self) -> &QualifiedTable {
        &self.table
    }

    /// Create the destination table or add columns it lacks, once per new
    /// column set.
    async fn prepare_destination(&self, batch: &RecordBatch) -> Result<(), WriteError> {
        let schema = batch.schema();
        let mut ensured = self.ensured_columns.lock().await;
        if schema.fields().iter().all(|f| ensured.contains(f.name())) {
            return Ok(());
        }
        ensure_table(self.writer.db().as_ref(), &self.table, &schema, &self.primary_keys)
            .await
            .map_err(WriteError::Schema)?;
        ensured.extend(schema.fields().iter().map(|f| f.name().clone()));
        Ok(())
    }

    /// Fetch, clean and write one batch.
    pub async fn process_one(&self, params: ParamRecord, cancel: CancellationToken) -> BatchOutcome {
        if cancel.is_cancelled() {
            return BatchOutcome::Cancelled;
        }

        let raw = match self.fetcher.fetch(&params).await {
            Ok(batch) => batch,
            Err(e) => return BatchOutcome::failure(BatchStage::Fetch, format!("{e:#}")),
        };
        if raw.num_rows() == 0 {
            return BatchOutcome::NoData;
        }
        if cancel.is_cancelled() {
            return BatchOutcome::Cancelled;
        }

        let cleaned = match self.pipeline.run(&raw, &self.job_id) {
            Ok(cleaned) => cleaned,
            Err(e) => return BatchOutcome::failure(BatchStage::Clean, e.to_string()),
        };
        if cleaned.unresolved_dates > 0
            || cleaned.unmapped_identifiers > 0
            || cleaned.null_key_rows > 0
        {
            tracing::warn!(
                task = %self.name,
                params = %params,
                unresolved_dates = cleaned.unresolved_dates,
                unmapped_identifiers = cleaned.unmapped_identifiers,
                null_key_rows = cleaned.null_key_rows,
                "batch has values that could not be aligned"
            );
        }
        if !cleaned.validation.is_valid || !cleaned.validation.out_of_range_rows.is_empty() {
            tracing::warn!(
                task = %self.name,
                params = %params,
                validation = %cleaned.validation.summary(),
                "batch written with validation flags"
            );
        }

        if let Err(e) = self.prepare_destination(&cleaned.batch).await {
            return BatchOutcome::failure(BatchStage::Write, e.to_string());
        }
        match self
            .writer
            .upsert_cancellable(&cleaned.batch, &self.table, &self.primary_keys, self.strategy, &cancel)
            .await
        {
            Ok(rows) => BatchOutcome::Success(rows),
            Err(WriteError::Cancelled { committed_rows }) => {
                tracing::info!(task = %self.name, committed_rows, "write interrupted by stop request");
                BatchOutcome::Cancelled
            }
            Err(e) => BatchOutcome::failure(BatchStage::Write, e.to_string()),
        }
    }

    /// Plan with `plan`, then run every batch with at most `concurrency`
    /// in flight.
    pub async fn run<P>(self: Arc<Self>, plan: P, concurrency: usize, stop: &CancellationToken) -> TaskResult
    where
        P: std::future::Future<Output = Result<Vec<ParamRecord>, PlanError>>,
    {
        let mut engine = match ExecutionEngine::new(concurrency) {
            Ok(engine) => engine,
            Err(e) => return TaskResult::planning_failed(0, e.to_string()),
        };
        tracing::info!(task = %self.name, job_id = %self.job_id, table = %self.table, "task started");
        let task = Arc::clone(&self);
        let result = engine
            .run_plan(
                plan,
                move |params, cancel| {
                    let task = Arc::clone(&task);
                    async move { task.process_one(params, cancel).await }
                },
                stop,
            )
            .await;
        tracing::info!(
            task = %self.name,
            status = %result.status,
            rows = result.rows,
            failed_batches = result.failed_batches,
            message = %result.message,
            "task finished"
        );
        result
    }
}
