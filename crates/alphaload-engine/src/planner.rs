//! Batch planning: source, partition and map composed into parameter records.

use std::sync::Arc;

use alphaload_types::ParamRecord;
use alphaload_writer::{DbError, DbManager, QualifiedTable, SqlValue};
use chrono::{Days, NaiveDate};

use crate::config::types::{MapKind, PlanningConfig, PlanningStrategy};
use crate::errors::PlanError;
use crate::mapping::{DateRangeMap, JoinedEntityMap, MapStrategy, SingleEntityMap};
use crate::partition::{format_yyyymmdd, parse_yyyymmdd, BySize, PartitionStrategy, SmartTimePartition};
use crate::source::{CalendarDaysSource, DateRangeSource, ItemSource, QuerySource, StaticSource};

/// Turns a task's items into the ordered parameter records of its batches.
pub struct BatchPlanner<T: Send> {
    source: Arc<dyn ItemSource<T>>,
    partition: Arc<dyn PartitionStrategy<T>>,
    map: Arc<dyn MapStrategy<T>>,
}

impl<T: Send> std::fmt::Debug for BatchPlanner<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchPlanner").finish_non_exhaustive()
    }
}

impl<T: Send + Sync> BatchPlanner<T> {
    pub fn new(
        source: Arc<dyn ItemSource<T>>,
        partition: Arc<dyn PartitionStrategy<T>>,
        map: Arc<dyn MapStrategy<T>>,
    ) -> Self {
        Self {
            source,
            partition,
            map,
        }
    }

    /// List, partition and map the items, then merge `extra_params` into
    /// every record. An empty source yields no records.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Source`] if listing fails, or the partition or
    /// map strategy's error.
    pub async fn generate(&self, extra_params: &ParamRecord) -> Result<Vec<ParamRecord>, PlanError> {
        let items = self.source.list().await.map_err(PlanError::Source)?;
        if items.is_empty() {
            tracing::info!("item source is empty, nothing to plan");
            return Ok(Vec::new());
        }
        let records = self
            .partition
            .partition(&items)?
            .iter()
            .map(|batch| Ok(self.map.map(batch)?.merged(extra_params)))
            .collect::<Result<Vec<_>, PlanError>>()?;
        tracing::info!(items = items.len(), batches = records.len(), "planned batches");
        Ok(records)
    }
}

fn value_as_date(value: &SqlValue) -> Option<NaiveDate> {
    match value {
        SqlValue::Date(date) => *date,
        SqlValue::Timestamp(ts) => ts.map(|ts| ts.date()),
        SqlValue::TimestampTz(ts) => ts.map(|ts| ts.date_naive()),
        SqlValue::Text(Some(text)) => parse_yyyymmdd(text)
            .ok()
            .or_else(|| NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()),
        other => other
            .as_i64()
            .and_then(|v| parse_yyyymmdd(&v.to_string()).ok()),
    }
}

/// Latest date already loaded into `table.column`, or `None` when the table
/// does not exist yet or is empty.
///
/// # Errors
///
/// Returns the database error, or [`DbError::Query`] when the stored value
/// is not a date.
pub async fn latest_loaded_date(
    db: &dyn DbManager,
    table: &QualifiedTable,
    column: &str,
) -> Result<Option<NaiveDate>, DbError> {
    if !db.table_exists(table).await? {
        return Ok(None);
    }
    let Some(value) = db.max_value(table, column).await? else {
        return Ok(None);
    };
    value_as_date(&value).map(Some).ok_or_else(|| {
        DbError::Query(format!("MAX({column}) of {table} is not a date: {value}"))
    })
}

/// First date to load: the day after `latest` when that is past
/// `configured_start`, otherwise `configured_start`.
///
/// # Errors
///
/// Returns [`PlanError::InvalidDateRange`] if `configured_start` is not `YYYYMMDD`.
pub fn incremental_start(configured_start: &str, latest: Option<NaiveDate>) -> Result<String, PlanError> {
    let start = parse_yyyymmdd(configured_start)?;
    let resumed = latest
        .and_then(|d| d.checked_add_days(Days::new(1)))
        .filter(|next| *next > start)
        .unwrap_or(start);
    Ok(format_yyyymmdd(resumed))
}

fn required<'a>(value: Option<&'a String>, name: &str) -> Result<&'a str, PlanError> {
    value
        .map(String::as_str)
        .ok_or_else(|| PlanError::InvalidArgument(format!("planning.{name} is required")))
}

/// Plan a configured task. `db` is needed for `entity_query` and
/// `incremental_column`.
///
/// # Errors
///
/// Returns a [`PlanError`] for unusable configuration, a failing source or
/// an unreachable destination.
pub async fn plan_from_config(
    planning: &PlanningConfig,
    table: &QualifiedTable,
    db: Option<Arc<dyn DbManager>>,
) -> Result<Vec<ParamRecord>, PlanError> {
    let map: Arc<dyn MapStrategy<String>> = match planning.map_kind() {
        MapKind::DateRange => Arc::new(DateRangeMap::default()),
        MapKind::SingleEntity => Arc::new(SingleEntityMap {
            key: planning.entity_key.clone(),
        }),
        MapKind::JoinedEntities => Arc::new(JoinedEntityMap {
            key: planning.entity_key.clone(),
            ..JoinedEntityMap::default()
        }),
    };
    let partition: Arc<dyn PartitionStrategy<String>> = match planning.strategy {
        PlanningStrategy::SmartTime => Arc::new(SmartTimePartition),
        PlanningStrategy::BySize => Arc::new(BySize::new(planning.batch_size.unwrap_or(0))?),
    };

    let source: Arc<dyn ItemSource<String>> = if let Some(sql) = &planning.entity_query {
        let db = db.ok_or_else(|| {
            PlanError::InvalidArgument("entity_query planning needs a database".into())
        })?;
        Arc::new(QuerySource::new(db, sql.clone()))
    } else if !planning.entities.is_empty() {
        Arc::new(StaticSource(planning.entities.clone()))
    } else {
        let mut start_date = required(planning.start_date.as_ref(), "start_date")?.to_string();
        let end_date = required(planning.end_date.as_ref(), "end_date")?.to_string();
        if let Some(column) = &planning.incremental_column {
            let db = db.ok_or_else(|| {
                PlanError::InvalidArgument("incremental planning needs a database".into())
            })?;
            let latest = latest_loaded_date(db.as_ref(), table, column)
                .await
                .map_err(|e| PlanError::Source(anyhow::Error::new(e).context("reading latest loaded date")))?;
            start_date = incremental_start(&start_date, latest)?;
            if parse_yyyymmdd(&start_date)? > parse_yyyymmdd(&end_date)? {
                tracing::info!(table = %table, end_date = %end_date, "destination already up to date");
                return Ok(Vec::new());
            }
            tracing::info!(table = %table, start_date = %start_date, "resuming after latest loaded date");
        }
        match planning.strategy {
            PlanningStrategy::SmartTime => Arc::new(DateRangeSource {
                start_date,
                end_date,
            }),
            PlanningStrategy::BySize => Arc::new(CalendarDaysSource {
                start_date,
                end_date,
            }),
        }
    };

    BatchPlanner::new(source, partition, map)
        .generate(&planning.extra_params)
        .await
}
