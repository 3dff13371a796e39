//! Bounded-concurrency batch execution and outcome aggregation.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use alphaload_types::{BatchOutcome, BatchStage, ParamRecord, TaskResult, TaskStatus};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::errors::PlanError;

/// Lifecycle of one [`ExecutionEngine`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Runs one task's batches under a concurrency limit.
///
/// Batches are isolated: a failed, cancelled or panicking batch never stops
/// its siblings. Outcomes are only combined once every started batch has
/// finished.
#[derive(Debug)]
pub struct ExecutionEngine {
    concurrency_limit: usize,
    phase: RunPhase,
}

impl ExecutionEngine {
    /// # Errors
    ///
    /// Returns [`PlanError::InvalidArgument`] when `concurrency_limit` is zero.
    pub fn new(concurrency_limit: usize) -> Result<Self, PlanError> {
        if concurrency_limit == 0 {
            return Err(PlanError::InvalidArgument(
                "concurrency limit must be at least 1".into(),
            ));
        }
        Ok(Self {
            concurrency_limit,
            phase: RunPhase::Pending,
        })
    }

    #[must_use]
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    #[must_use]
    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Run every record through `process_one` and aggregate the outcomes.
    ///
    /// `stop` is checked before each batch starts; batches that never start
    /// count as cancelled. Running batches receive a child token and are left
    /// to drain.
    pub async fn run<F, Fut>(
        &mut self,
        params: Vec<ParamRecord>,
        process_one: F,
        stop: &CancellationToken,
    ) -> TaskResult
    where
        F: Fn(ParamRecord, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BatchOutcome> + Send + 'static,
    {
        if self.phase != RunPhase::Pending {
            return TaskResult::planning_failed(0, "execution engine has already run");
        }
        if stop.is_cancelled() {
            tracing::info!(batches = params.len(), "stop requested before start");
            self.phase = RunPhase::Cancelled;
            return TaskResult::cancelled_before_start();
        }
        self.phase = RunPhase::Running;

        let total = params.len();
        tracing::info!(
            batches = total,
            concurrency = self.concurrency_limit,
            "starting batch execution"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let process_one = Arc::new(process_one);
        let mut join_set: JoinSet<BatchOutcome> = JoinSet::new();
        let mut outcomes = Vec::with_capacity(total);

        for (batch, record) in params.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                () = stop.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit.filter(|_| !stop.is_cancelled()) else {
                tracing::debug!(batch, "batch not started, stop requested");
                outcomes.push(BatchOutcome::Cancelled);
                continue;
            };

            let process_one = Arc::clone(&process_one);
            let token = stop.child_token();
            join_set.spawn(async move {
                let _permit = permit;
                tracing::debug!(batch, params = %record, "batch started");
                let outcome = process_one(record, token).await;
                match &outcome {
                    BatchOutcome::Success(rows) => {
                        tracing::debug!(batch, rows, "batch finished");
                    }
                    BatchOutcome::NoData => tracing::debug!(batch, "batch returned no data"),
                    BatchOutcome::Failure(failure) => {
                        tracing::warn!(batch, error = %failure, "batch failed");
                    }
                    BatchOutcome::Cancelled => tracing::debug!(batch, "batch cancelled"),
                }
                outcome
            });
        }

        while let Some(joined) = join_set.join_next().await {
            outcomes.push(joined.unwrap_or_else(|join_err| {
                tracing::error!(error = %join_err, "batch task panicked");
                BatchOutcome::failure(BatchStage::Task, format!("batch task panicked: {join_err}"))
            }));
        }

        let result = aggregate(&outcomes);
        self.phase = match result.status {
            TaskStatus::Cancelled => RunPhase::Cancelled,
            TaskStatus::Failed => RunPhase::Failed,
            _ => RunPhase::Completed,
        };
        tracing::info!(
            status = %result.status,
            rows = result.rows,
            failed_batches = result.failed_batches,
            batches = total,
            "batch execution finished"
        );
        result
    }

    /// Run the batches of a plan that is still being produced. A planning
    /// error fails the task without running anything.
    pub async fn run_plan<P, F, Fut>(
        &mut self,
        plan: P,
        process_one: F,
        stop: &CancellationToken,
    ) -> TaskResult
    where
        P: Future<Output = Result<Vec<ParamRecord>, PlanError>>,
        F: Fn(ParamRecord, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BatchOutcome> + Send + 'static,
    {
        match plan.await {
            Ok(params) => self.run(params, process_one, stop).await,
            Err(err) => {
                tracing::error!(error = %err, "batch planning failed");
                self.phase = RunPhase::Failed;
                TaskResult::planning_failed(0, format!("planning failed: {err}"))
            }
        }
    }
}

/// Combine per-batch outcomes into one task result.
///
/// The result does not depend on the order of `outcomes`.
#[must_use]
pub fn aggregate(outcomes: &[BatchOutcome]) -> TaskResult {
    let mut rows: u64 = 0;
    let mut succeeded: u64 = 0;
    let mut failed: u64 = 0;
    let mut no_data: u64 = 0;
    let mut cancelled = false;
    let mut errors = BTreeSet::new();

    for outcome in outcomes {
        match outcome {
            BatchOutcome::Success(n) => {
                rows += n;
                if *n > 0 {
                    succeeded += 1;
                }
            }
            BatchOutcome::NoData => no_data += 1,
            BatchOutcome::Failure(failure) => {
                errors.insert(failure.to_string());
            }
            BatchOutcome::Cancelled => cancelled = true,
        }
        if outcome.is_failed() {
            failed += 1;
        }
    }

    let status = if cancelled {
        TaskStatus::Cancelled
    } else if failed > 0 && rows > 0 {
        TaskStatus::PartialSuccess
    } else if failed > 0 {
        TaskStatus::Failed
    } else if succeeded == 0 {
        TaskStatus::NoData
    } else {
        TaskStatus::Success
    };

    let mut message = if outcomes.is_empty() {
        "no batches planned".to_string()
    } else {
        format!(
            "{} batches: {succeeded} succeeded, {failed} failed, {no_data} without data; {rows} rows written",
            outcomes.len()
        )
    };
    if let Some(first) = errors.first() {
        message.push_str("; first error: ");
        message.push_str(first);
    }

    TaskResult {
        status,
        rows,
        failed_batches: failed,
        message,
    }
}
