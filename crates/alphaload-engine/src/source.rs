//! Collaborator seams: item sources feeding the planner, and the data
//! fetcher called once per parameter record.

use std::sync::Arc;

use alphaload_types::ParamRecord;
use alphaload_writer::{DbManager, SqlValue};
use anyhow::Context;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::Days;

use crate::partition::{format_yyyymmdd, parse_yyyymmdd};

/// Ordered items to partition: dates, entity codes, ...
#[async_trait]
pub trait ItemSource<T: Send>: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<T>>;
}

/// Fetches one batch of raw data from the upstream API.
///
/// Implementations own their transport and rate limiting. The engine does
/// not retry fetches; a failed fetch becomes a failed batch.
#[async_trait]
pub trait DataFetcher: Send + Sync {
    async fn fetch(&self, params: &ParamRecord) -> anyhow::Result<RecordBatch>;
}

/// A fixed list of items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticSource<T>(pub Vec<T>);

#[async_trait]
impl<T: Clone + Send + Sync> ItemSource<T> for StaticSource<T> {
    async fn list(&self) -> anyhow::Result<Vec<T>> {
        Ok(self.0.clone())
    }
}

/// `[start_date, end_date]`, the input of
/// [`SmartTimePartition`](crate::partition::SmartTimePartition).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRangeSource {
    pub start_date: String,
    pub end_date: String,
}

#[async_trait]
impl ItemSource<String> for DateRangeSource {
    async fn list(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec![self.start_date.clone(), self.end_date.clone()])
    }
}

/// Every calendar day in `start_date..=end_date`, as `YYYYMMDD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarDaysSource {
    pub start_date: String,
    pub end_date: String,
}

#[async_trait]
impl ItemSource<String> for CalendarDaysSource {
    async fn list(&self) -> anyhow::Result<Vec<String>> {
        let start = parse_yyyymmdd(&self.start_date)?;
        let end = parse_yyyymmdd(&self.end_date)?;
        let mut days = Vec::new();
        let mut day = start;
        while day <= end {
            days.push(format_yyyymmdd(day));
            day = day
                .checked_add_days(Days::new(1))
                .context("calendar overflow")?;
        }
        Ok(days)
    }
}

/// Entity codes listed by a query against the database, first column only.
#[derive(Clone)]
pub struct QuerySource {
    db: Arc<dyn DbManager>,
    sql: String,
}

impl std::fmt::Debug for QuerySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySource").field("sql", &self.sql).finish_non_exhaustive()
    }
}

impl QuerySource {
    pub fn new(db: Arc<dyn DbManager>, sql: impl Into<String>) -> Self {
        Self {
            db,
            sql: sql.into(),
        }
    }
}

#[async_trait]
impl ItemSource<String> for QuerySource {
    async fn list(&self) -> anyhow::Result<Vec<String>> {
        let rows = self
            .db
            .fetch(&self.sql, &[])
            .await
            .with_context(|| format!("entity query failed: {}", self.sql))?;
        let codes: Vec<String> = rows
            .iter()
            .filter_map(|row| row.first())
            .filter(|value| !value.is_null())
            .map(SqlValue::to_string)
            .collect();
        tracing::debug!(codes = codes.len(), "listed entities");
        Ok(codes)
    }
}
