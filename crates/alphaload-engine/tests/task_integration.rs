use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use alphaload_clean::ValidationPolicy;
use alphaload_engine::config::{parser, validator, TaskConfig};
use alphaload_engine::planner::plan_from_config;
use alphaload_engine::{DataFetcher, IngestTask, PlanError};
use alphaload_types::columns::{DATA_VERSION, INGEST_JOB_ID, PROCESSED_AT, SOURCE_TABLE};
use alphaload_types::{BatchOutcome, BatchStage, ParamRecord, TaskStatus};
use alphaload_writer::{MemoryDatabase, SqlValue};
use anyhow::Context;
use arrow::array::{Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct MarketFetcher {
    calls: AtomicUsize,
    fail_start: Option<&'static str>,
    empty: bool,
    without_amount: bool,
}

impl MarketFetcher {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataFetcher for MarketFetcher {
    async fn fetch(&self, params: &ParamRecord) -> anyhow::Result<RecordBatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let start = params
            .get_str("start_date")
            .context("start_date missing from params")?;
        if self.fail_start == Some(start) {
            anyhow::bail!("upstream returned HTTP 500 for {start}");
        }

        let mut fields = vec![
            Field::new("ts_code", DataType::Utf8, true),
            Field::new("trade_date", DataType::Utf8, true),
            Field::new("close", DataType::Float64, true),
            Field::new("vol", DataType::Float64, true),
        ];
        if !self.without_amount {
            fields.push(Field::new("amount", DataType::Float64, true));
        }
        let schema = Arc::new(Schema::new(fields));
        if self.empty {
            return Ok(RecordBatch::new_empty(schema));
        }

        let mut columns: Vec<arrow::array::ArrayRef> = vec![
            Arc::new(StringArray::from(vec!["600000", "000001.SZ"])),
            Arc::new(StringArray::from(vec![start, start])),
            Arc::new(Float64Array::from(vec![7.5, 11.0])),
            Arc::new(Float64Array::from(vec![2.0, 3.0])),
        ];
        if !self.without_amount {
            columns.push(Arc::new(Float64Array::from(vec![1.5, 2.5])));
        }
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

fn fixture() -> TaskConfig {
    std::env::set_var("AL_FIXTURE_PG_HOST", "localhost");
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/daily_task.yaml");
    let config = parser::parse_task(&path).unwrap();
    validator::validate_task(&config).unwrap();
    config
}

async fn run_task(
    config: &TaskConfig,
    fetcher: Arc<MarketFetcher>,
    db: &MemoryDatabase,
    stop: &CancellationToken,
) -> alphaload_types::TaskResult {
    let task = Arc::new(IngestTask::from_config(
        config,
        "job-1",
        fetcher,
        Arc::new(db.clone()),
    ));
    let dest = config.destination_table();
    let plan = plan_from_config(&config.planning, &dest, None);
    task.run(plan, config.resources.concurrency, stop).await
}

#[tokio::test]
async fn fixture_task_loads_every_batch_with_lineage() {
    let config = fixture();
    let db = MemoryDatabase::new();
    let fetcher = Arc::new(MarketFetcher::default());

    let result = run_task(&config, Arc::clone(&fetcher), &db, &CancellationToken::new()).await;
    assert_eq!(result.status, TaskStatus::Success, "{}", result.message);
    assert_eq!(result.rows, 4);
    assert_eq!(result.failed_batches, 0);
    assert_eq!(fetcher.calls(), 2);

    let table = db.table(&config.destination_table()).await.unwrap();
    assert_eq!(table.len(), 4);
    for row in table.rows() {
        for column in [SOURCE_TABLE, PROCESSED_AT, DATA_VERSION, INGEST_JOB_ID] {
            assert!(!row[column].is_null(), "{column} is null");
        }
        assert_eq!(row[INGEST_JOB_ID], SqlValue::from("job-1"));
        assert_eq!(row[SOURCE_TABLE], SqlValue::from("daily"));
    }

    let row = table.get(&["600000.SH", "20230201"]).unwrap();
    assert_eq!(row["amount"], SqlValue::Float64(Some(15_000.0)));
    assert_eq!(row["vol"], SqlValue::Float64(Some(200.0)));
    assert_eq!(row["vol_lot"], SqlValue::Float64(Some(2.0)));
    assert_eq!(row["_mapping_failed"], SqlValue::Bool(Some(false)));
    assert_eq!(row["_validation_flag"], SqlValue::Bool(Some(false)));
}

#[tokio::test]
async fn rerunning_a_task_is_idempotent() {
    let config = fixture();
    let db = MemoryDatabase::new();

    let first = run_task(&config, Arc::new(MarketFetcher::default()), &db, &CancellationToken::new()).await;
    let keys = |t: &alphaload_writer::memory::MemoryTable| {
        t.rows()
            .map(|r| (r["ts_code"].to_string(), r["trade_date"].to_string()))
            .collect::<Vec<_>>()
    };
    let before = keys(&db.table(&config.destination_table()).await.unwrap());

    let second = run_task(&config, Arc::new(MarketFetcher::default()), &db, &CancellationToken::new()).await;
    let after = keys(&db.table(&config.destination_table()).await.unwrap());

    assert_eq!(first.rows, second.rows);
    assert_eq!(before, after);
    assert_eq!(after.len(), 4);
}

#[tokio::test]
async fn failed_fetch_yields_partial_success() {
    let config = fixture();
    let db = MemoryDatabase::new();
    let fetcher = Arc::new(MarketFetcher {
        fail_start: Some("20230101"),
        ..MarketFetcher::default()
    });

    let result = run_task(&config, fetcher, &db, &CancellationToken::new()).await;
    assert_eq!(result.status, TaskStatus::PartialSuccess);
    assert_eq!(result.rows, 2);
    assert_eq!(result.failed_batches, 1);
    assert!(result.message.contains("HTTP 500"));
    assert!(result.is_ok());
}

#[tokio::test]
async fn empty_fetches_are_no_data() {
    let config = fixture();
    let db = MemoryDatabase::new();
    let fetcher = Arc::new(MarketFetcher {
        empty: true,
        ..MarketFetcher::default()
    });

    let result = run_task(&config, fetcher, &db, &CancellationToken::new()).await;
    assert_eq!(result.status, TaskStatus::NoData);
    assert_eq!(result.failed_batches, 0);
    assert!(db.table(&config.destination_table()).await.is_none());
}

#[tokio::test]
async fn pre_cancelled_task_never_fetches() {
    let config = fixture();
    let db = MemoryDatabase::new();
    let fetcher = Arc::new(MarketFetcher::default());
    let stop = CancellationToken::new();
    stop.cancel();

    let result = run_task(&config, Arc::clone(&fetcher), &db, &stop).await;
    assert_eq!(result.status, TaskStatus::Cancelled);
    assert_eq!(result.rows, 0);
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn invalid_batches_fail_under_abort_policy() {
    let mut config = fixture();
    config.clean.on_invalid = ValidationPolicy::Abort;
    let db = MemoryDatabase::new();
    let fetcher = Arc::new(MarketFetcher {
        without_amount: true,
        ..MarketFetcher::default()
    });

    let result = run_task(&config, fetcher, &db, &CancellationToken::new()).await;
    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.failed_batches, 2);
    assert!(result.message.contains("missing columns: amount"));
}

#[tokio::test]
async fn planning_failure_fails_the_task() {
    let config = fixture();
    let db = MemoryDatabase::new();
    let fetcher = Arc::new(MarketFetcher::default());
    let task = Arc::new(IngestTask::from_config(
        &config,
        "job-2",
        Arc::clone(&fetcher) as Arc<dyn DataFetcher>,
        Arc::new(db),
    ));

    let result = task
        .run(
            async { Err(PlanError::InvalidDateRange("start 20230201 is after end 20230101".into())) },
            2,
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.rows, 0);
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn exhausted_write_retries_fail_the_batch_at_write_stage() {
    let config = fixture();
    let db = MemoryDatabase::new();
    db.inject_upsert_failures(0, usize::MAX).await;
    let task = IngestTask::from_config(
        &config,
        "job-3",
        Arc::new(MarketFetcher::default()),
        Arc::new(db.clone()),
    );

    let params = ParamRecord::new()
        .with("start_date", "20230101")
        .with("end_date", "20230131");
    match task.process_one(params, CancellationToken::new()).await {
        BatchOutcome::Failure(failure) => {
            assert_eq!(failure.stage, BatchStage::Write);
            assert!(failure.message.contains("failed after 2 attempt(s)"), "{}", failure.message);
            assert!(failure.message.contains("injected failure"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    // max_retries is 1 in the fixture: one attempt plus one retry.
    assert_eq!(db.upsert_calls().await, 2);
}

#[tokio::test]
async fn one_failing_write_yields_partial_success() {
    let config = fixture();
    let db = MemoryDatabase::new();
    // The first batch to write commits, every later attempt fails.
    db.inject_upsert_failures(1, usize::MAX).await;

    let result = run_task(&config, Arc::new(MarketFetcher::default()), &db, &CancellationToken::new()).await;
    assert_eq!(result.status, TaskStatus::PartialSuccess, "{}", result.message);
    assert_eq!(result.rows, 2);
    assert_eq!(result.failed_batches, 1);
    assert!(result.message.contains("[write]"));
    assert_eq!(db.table(&config.destination_table()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn every_write_failing_fails_the_task() {
    let config = fixture();
    let db = MemoryDatabase::new();
    db.inject_upsert_failures(0, usize::MAX).await;

    let result = run_task(&config, Arc::new(MarketFetcher::default()), &db, &CancellationToken::new()).await;
    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.rows, 0);
    assert_eq!(result.failed_batches, 2);
    assert!(!result.is_ok());
}

const MINIMAL_TASK: &str = r#"
version: "1.0"
task: daily_minimal
table: clean.daily
primary_keys: [ts_code, trade_date]
destination:
  host: localhost
  user: loader
  database: market
planning:
  strategy: smart_time
  start_date: "20230103"
  end_date: "20230103"
clean:
  date:
    column: trade_date
  identifier:
    column: ts_code
lineage:
  source_tables: [daily]
"#;

/// Returns the same rows for every batch.
struct FixedFetcher {
    codes: Vec<&'static str>,
    dates: Vec<&'static str>,
}

#[async_trait]
impl DataFetcher for FixedFetcher {
    async fn fetch(&self, _params: &ParamRecord) -> anyhow::Result<RecordBatch> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("ts_code", DataType::Utf8, true),
            Field::new("trade_date", DataType::Utf8, true),
            Field::new("close", DataType::Float64, true),
        ]));
        let close: Vec<f64> = (1..=self.codes.len()).map(|i| i as f64).collect();
        Ok(RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(self.codes.clone())),
                Arc::new(StringArray::from(self.dates.clone())),
                Arc::new(Float64Array::from(close)),
            ],
        )?)
    }
}

fn minimal_task() -> TaskConfig {
    let config = parser::parse_task_str(MINIMAL_TASK).unwrap();
    validator::validate_task(&config).unwrap();
    config
}

#[tokio::test]
async fn keys_that_collide_after_alignment_are_written_once() {
    let config = minimal_task();
    assert!(config.schema.primary_keys.is_empty());
    let db = MemoryDatabase::new();
    let fetcher = Arc::new(FixedFetcher {
        codes: vec!["600000", "600000.SH"],
        dates: vec!["20230103", "2023-01-03"],
    });
    let task = Arc::new(IngestTask::from_config(&config, "job-4", fetcher, Arc::new(db.clone())));

    let dest = config.destination_table();
    let plan = plan_from_config(&config.planning, &dest, None);
    let result = task.run(plan, 1, &CancellationToken::new()).await;
    assert_eq!(result.status, TaskStatus::Success, "{}", result.message);
    assert_eq!(result.rows, 1);

    let table = db.table(&config.destination_table()).await.unwrap();
    assert_eq!(table.len(), 1);
    let row = table.get(&["600000.SH", "20230103"]).unwrap();
    assert_eq!(row["close"], SqlValue::Float64(Some(2.0)));
}

#[tokio::test]
async fn rows_with_unparsable_dates_are_not_merged_or_written() {
    let config = minimal_task();
    let db = MemoryDatabase::new();
    let fetcher = Arc::new(FixedFetcher {
        codes: vec!["600000.SH", "600000.SH", "000001.SZ"],
        dates: vec!["garbage-1", "garbage-2", "20230103"],
    });
    let task = Arc::new(IngestTask::from_config(&config, "job-5", fetcher, Arc::new(db.clone())));

    let dest = config.destination_table();
    let plan = plan_from_config(&config.planning, &dest, None);
    let result = task.run(plan, 1, &CancellationToken::new()).await;
    assert_eq!(result.status, TaskStatus::Success, "{}", result.message);
    assert_eq!(result.rows, 1);
    assert_eq!(db.rollbacks().await, 0);

    let table = db.table(&config.destination_table()).await.unwrap();
    assert_eq!(table.len(), 1);
    assert!(table.get(&["000001.SZ", "20230103"]).is_some());
}
