//! In-memory [`DbManager`] with Postgres UPSERT semantics.
//!
//! Tables are keyed maps, transactions buffer their writes until commit, and
//! failures can be injected into upsert calls to exercise retry paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::db::{DbManager, DbTransaction};
use crate::error::DbError;
use crate::statement::{QualifiedTable, TableDefinition, UpsertStatement};
use crate::value::SqlValue;

const KEY_SEPARATOR: char = '\u{1f}';

/// One stored row, by column name.
pub type MemoryRow = BTreeMap<String, SqlValue>;

/// A table held by [`MemoryDatabase`].
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub columns: Vec<String>,
    pub primary_keys: Vec<String>,
    rows: BTreeMap<String, MemoryRow>,
}

impl MemoryTable {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in primary-key order.
    pub fn rows(&self) -> impl Iterator<Item = &MemoryRow> {
        self.rows.values()
    }

    /// Look a row up by its key values, rendered as text.
    #[must_use]
    pub fn get(&self, key: &[&str]) -> Option<&MemoryRow> {
        let joined: String = key.join(&KEY_SEPARATOR.to_string());
        self.rows.get(&joined)
    }

    fn key_of(&self, row: &MemoryRow) -> String {
        self.primary_keys
            .iter()
            .map(|k| row.get(k).map_or_else(|| "NULL".to_string(), ToString::to_string))
            .collect::<Vec<_>>()
            .join(&KEY_SEPARATOR.to_string())
    }
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<QualifiedTable, MemoryTable>,
    queries: HashMap<String, Vec<Vec<SqlValue>>>,
    executed: Vec<String>,
    upsert_calls: usize,
    fail_after: usize,
    failures_left: usize,
    injected: Option<DbError>,
    commits: usize,
    rollbacks: usize,
}

impl State {
    fn apply(&mut self, statement: &UpsertStatement, rows: &[Vec<SqlValue>]) -> Result<(), DbError> {
        let table = self.tables.get_mut(&statement.table).ok_or_else(|| {
            DbError::Query(format!("relation {} does not exist", statement.table))
        })?;
        for row in rows {
            let mut record = MemoryRow::new();
            for (column, value) in statement.columns.iter().zip(row) {
                record.insert(column.clone(), value.clone());
            }
            let key = table.key_of(&record);
            let stored = table.rows.entry(key).or_default();
            stored.extend(record);
        }
        Ok(())
    }

    fn check(&self, statement: &UpsertStatement, rows: &[Vec<SqlValue>]) -> Result<(), DbError> {
        let table = self.tables.get(&statement.table).ok_or_else(|| {
            DbError::Query(format!("relation {} does not exist", statement.table))
        })?;
        if let Some(missing) = statement
            .columns
            .iter()
            .find(|c| !table.columns.contains(*c))
        {
            return Err(DbError::Query(format!(
                "column {missing} of relation {} does not exist",
                statement.table
            )));
        }
        if table.primary_keys.is_empty() || table.primary_keys != statement.primary_keys {
            return Err(DbError::Query(format!(
                "there is no unique constraint matching the ON CONFLICT specification on {}",
                statement.table
            )));
        }
        if let Some(row) = rows.iter().find(|row| row.len() != statement.columns.len()) {
            return Err(DbError::Query(format!(
                "row has {} values for {} columns",
                row.len(),
                statement.columns.len()
            )));
        }

        let key_positions: Vec<(usize, &String)> = statement
            .columns
            .iter()
            .enumerate()
            .filter(|(_, column)| table.primary_keys.contains(*column))
            .collect();
        let mut seen = HashSet::with_capacity(rows.len());
        for row in rows {
            if let Some((_, column)) = key_positions.iter().find(|(pos, _)| row[*pos].is_null()) {
                return Err(DbError::Constraint(format!(
                    "null value in column \"{column}\" of relation \"{}\" violates not-null constraint",
                    statement.table.name
                )));
            }
            let key = key_positions
                .iter()
                .map(|(pos, _)| row[*pos].to_string())
                .collect::<Vec<_>>()
                .join(&KEY_SEPARATOR.to_string());
            if !seen.insert(key) {
                return Err(DbError::Constraint(
                    "ON CONFLICT DO UPDATE command cannot affect row a second time".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Shared in-memory database. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned result for an exact query string passed to [`DbManager::fetch`].
    pub async fn set_query_result(&self, sql: impl Into<String>, rows: Vec<Vec<SqlValue>>) {
        self.state.lock().await.queries.insert(sql.into(), rows);
    }

    /// Let `succeed` further upsert calls through, then fail the next
    /// `failures` calls with a retryable error.
    pub async fn inject_upsert_failures(&self, succeed: usize, failures: usize) {
        self.inject_upsert_error(succeed, failures, DbError::Query("injected failure".into()))
            .await;
    }

    /// Like [`Self::inject_upsert_failures`], failing with `error`.
    pub async fn inject_upsert_error(&self, succeed: usize, failures: usize, error: DbError) {
        let mut state = self.state.lock().await;
        state.fail_after = state.upsert_calls + succeed;
        state.failures_left = failures;
        state.injected = Some(error);
    }

    pub async fn table(&self, table: &QualifiedTable) -> Option<MemoryTable> {
        self.state.lock().await.tables.get(table).cloned()
    }

    pub async fn upsert_calls(&self) -> usize {
        self.state.lock().await.upsert_calls
    }

    pub async fn commits(&self) -> usize {
        self.state.lock().await.commits
    }

    pub async fn rollbacks(&self) -> usize {
        self.state.lock().await.rollbacks
    }

    pub async fn executed(&self) -> Vec<String> {
        self.state.lock().await.executed.clone()
    }
}

#[async_trait]
impl DbManager for MemoryDatabase {
    async fn execute(&self, sql: &str) -> Result<u64, DbError> {
        self.state.lock().await.executed.push(sql.to_string());
        Ok(0)
    }

    async fn fetch(&self, sql: &str, _params: &[SqlValue]) -> Result<Vec<Vec<SqlValue>>, DbError> {
        self.state
            .lock()
            .await
            .queries
            .get(sql)
            .cloned()
            .ok_or_else(|| DbError::Query(format!("no result registered for query: {sql}")))
    }

    async fn transaction(&self) -> Result<Box<dyn DbTransaction>, DbError> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
        }))
    }

    async fn table_exists(&self, table: &QualifiedTable) -> Result<bool, DbError> {
        Ok(self.state.lock().await.tables.contains_key(table))
    }

    async fn max_value(
        &self,
        table: &QualifiedTable,
        column: &str,
    ) -> Result<Option<SqlValue>, DbError> {
        let state = self.state.lock().await;
        let stored = state
            .tables
            .get(table)
            .ok_or_else(|| DbError::Query(format!("relation {table} does not exist")))?;
        let mut max: Option<&SqlValue> = None;
        for value in stored.rows().filter_map(|row| row.get(column)) {
            if value.is_null() {
                continue;
            }
            let greater = max.map_or(true, |current| {
                value.compare(current) == Some(std::cmp::Ordering::Greater)
            });
            if greater {
                max = Some(value);
            }
        }
        Ok(max.cloned())
    }

    async fn create_table(&self, definition: &TableDefinition) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        state
            .executed
            .extend(definition.ddl_statements());
        let table = state
            .tables
            .entry(definition.table.clone())
            .or_insert_with(|| MemoryTable {
                columns: Vec::new(),
                primary_keys: definition.primary_keys.clone(),
                rows: BTreeMap::new(),
            });
        for column in &definition.columns {
            if !table.columns.contains(&column.name) {
                table.columns.push(column.name.clone());
            }
        }
        Ok(())
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<State>>,
    pending: Vec<(UpsertStatement, Vec<Vec<SqlValue>>)>,
}

#[async_trait]
impl DbTransaction for MemoryTransaction {
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        self.state.lock().await.executed.push(sql.to_string());
        Ok(0)
    }

    async fn upsert(
        &mut self,
        statement: &UpsertStatement,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, DbError> {
        let mut state = self.state.lock().await;
        let call = state.upsert_calls;
        state.upsert_calls += 1;
        if call >= state.fail_after && state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(state
                .injected
                .clone()
                .unwrap_or_else(|| DbError::Query("injected failure".into())));
        }
        state.check(statement, rows)?;
        drop(state);
        self.pending.push((statement.clone(), rows.to_vec()));
        Ok(rows.len() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        for (statement, rows) in &self.pending {
            state.apply(statement, rows)?;
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.state.lock().await.rollbacks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::ColumnDefinition;

    fn definition() -> TableDefinition {
        TableDefinition {
            table: QualifiedTable::new("clean", "daily"),
            columns: ["ts_code", "trade_date", "close"]
                .into_iter()
                .map(|name| ColumnDefinition {
                    name: name.into(),
                    pg_type: "TEXT".into(),
                    nullable: true,
                })
                .collect(),
            primary_keys: vec!["ts_code".into(), "trade_date".into()],
        }
    }

    fn statement() -> UpsertStatement {
        UpsertStatement::new(
            QualifiedTable::new("clean", "daily"),
            vec!["ts_code".into(), "trade_date".into(), "close".into()],
            vec!["ts_code".into(), "trade_date".into()],
        )
    }

    fn row(code: &str, date: i64, close: f64) -> Vec<SqlValue> {
        vec![SqlValue::from(code), SqlValue::from(date), SqlValue::from(close)]
    }

    #[tokio::test]
    async fn committed_upserts_replace_on_key() {
        let db = MemoryDatabase::new();
        db.create_table(&definition()).await.unwrap();

        let mut tx = db.transaction().await.unwrap();
        tx.upsert(&statement(), &[row("a", 1, 1.0), row("b", 1, 2.0)])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.transaction().await.unwrap();
        tx.upsert(&statement(), &[row("a", 1, 9.0)]).await.unwrap();
        tx.commit().await.unwrap();

        let table = db.table(&QualifiedTable::new("clean", "daily")).await.unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get(&["a", "1"]).unwrap()["close"],
            SqlValue::Float64(Some(9.0))
        );
    }

    #[tokio::test]
    async fn rollback_discards_pending_rows() {
        let db = MemoryDatabase::new();
        db.create_table(&definition()).await.unwrap();
        let mut tx = db.transaction().await.unwrap();
        tx.upsert(&statement(), &[row("a", 1, 1.0)]).await.unwrap();
        tx.rollback().await.unwrap();

        let table = db.table(&QualifiedTable::new("clean", "daily")).await.unwrap();
        assert!(table.is_empty());
        assert_eq!(db.rollbacks().await, 1);
    }

    #[tokio::test]
    async fn unknown_column_is_rejected() {
        let db = MemoryDatabase::new();
        db.create_table(&definition()).await.unwrap();
        let mut stmt = statement();
        stmt.columns.push("vol".into());
        let mut tx = db.transaction().await.unwrap();
        let err = tx
            .upsert(&stmt, &[vec![
                SqlValue::from("a"),
                SqlValue::from(1_i64),
                SqlValue::from(1.0),
                SqlValue::from(1.0),
            ]])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("column vol"));
    }

    #[tokio::test]
    async fn injected_failures_hit_the_requested_calls() {
        let db = MemoryDatabase::new();
        db.create_table(&definition()).await.unwrap();
        db.inject_upsert_failures(1, 1).await;

        let mut tx = db.transaction().await.unwrap();
        assert!(tx.upsert(&statement(), &[row("a", 1, 1.0)]).await.is_ok());
        assert!(tx.upsert(&statement(), &[row("b", 1, 1.0)]).await.is_err());
        assert!(tx.upsert(&statement(), &[row("c", 1, 1.0)]).await.is_ok());
        assert_eq!(db.upsert_calls().await, 3);
    }

    #[tokio::test]
    async fn max_value_and_table_exists() {
        let db = MemoryDatabase::new();
        let table = QualifiedTable::new("clean", "daily");
        assert!(!db.table_exists(&table).await.unwrap());
        db.create_table(&definition()).await.unwrap();
        assert!(db.table_exists(&table).await.unwrap());
        assert_eq!(db.max_value(&table, "trade_date").await.unwrap(), None);

        let mut tx = db.transaction().await.unwrap();
        tx.upsert(
            &statement(),
            &[row("a", 20230103, 1.0), row("a", 20230105, 1.0), row("b", 20230104, 1.0)],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(
            db.max_value(&table, "trade_date").await.unwrap(),
            Some(SqlValue::Int64(Some(20230105)))
        );
    }

    #[tokio::test]
    async fn repeated_key_in_one_statement_is_rejected() {
        let db = MemoryDatabase::new();
        db.create_table(&definition()).await.unwrap();
        let mut tx = db.transaction().await.unwrap();
        let err = tx
            .upsert(&statement(), &[row("a", 1, 1.0), row("a", 1, 2.0)])
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("cannot affect row a second time"));
    }

    #[tokio::test]
    async fn null_key_value_is_rejected() {
        let db = MemoryDatabase::new();
        db.create_table(&definition()).await.unwrap();
        let mut tx = db.transaction().await.unwrap();
        let err = tx
            .upsert(
                &statement(),
                &[vec![SqlValue::from("a"), SqlValue::Int64(None), SqlValue::from(1.0)]],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
        assert!(err.to_string().contains("column \"trade_date\""));
    }

    #[tokio::test]
    async fn create_table_records_ddl() {
        let db = MemoryDatabase::new();
        db.create_table(&definition()).await.unwrap();
        let executed = db.executed().await;
        assert!(!executed.is_empty());
        assert!(executed.iter().any(|sql| sql.contains("PRIMARY KEY")));
    }

    #[tokio::test]
    async fn fetch_returns_registered_rows() {
        let db = MemoryDatabase::new();
        db.set_query_result("SELECT ts_code FROM stock_basic", vec![vec![SqlValue::from("600000.SH")]])
            .await;
        let rows = db.fetch("SELECT ts_code FROM stock_basic", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(db.fetch("SELECT 1", &[]).await.is_err());
    }
}
