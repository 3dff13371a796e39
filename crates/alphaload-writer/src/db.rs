//! Database manager seam.
//!
//! The ingestion core never talks to a driver directly. It goes through
//! [`DbManager`] for reads and DDL, and through a [`DbTransaction`] for
//! every write.

use async_trait::async_trait;
use pg_escape::quote_identifier;

use crate::error::DbError;
use crate::statement::{QualifiedTable, TableDefinition, UpsertStatement};
use crate::value::SqlValue;

/// A database the clean layer can read from and write to.
#[async_trait]
pub trait DbManager: Send + Sync {
    /// Run a statement without parameters. Returns affected rows.
    async fn execute(&self, sql: &str) -> Result<u64, DbError>;

    /// Run a query and return every row as owned values.
    async fn fetch(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Vec<SqlValue>>, DbError>;

    /// Open a transaction. It is rolled back unless committed.
    async fn transaction(&self) -> Result<Box<dyn DbTransaction>, DbError>;

    async fn table_exists(&self, table: &QualifiedTable) -> Result<bool, DbError> {
        let rows = self
            .fetch(
                "SELECT 1 FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2",
                &[
                    SqlValue::from(table.schema.as_str()),
                    SqlValue::from(table.name.as_str()),
                ],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    /// `MAX(column)` over the table, or `None` when it is empty.
    async fn max_value(
        &self,
        table: &QualifiedTable,
        column: &str,
    ) -> Result<Option<SqlValue>, DbError> {
        let sql = format!(
            "SELECT MAX({}) FROM {}",
            quote_identifier(column),
            table.quoted()
        );
        let rows = self.fetch(&sql, &[]).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .filter(|value| !value.is_null()))
    }

    /// Create the schema and table if missing and add absent columns.
    async fn create_table(&self, definition: &TableDefinition) -> Result<(), DbError> {
        for sql in definition.ddl_statements() {
            tracing::debug!(table = %definition.table, sql = %sql, "ensuring table");
            self.execute(&sql).await?;
        }
        Ok(())
    }
}

/// A unit of work against one [`DbManager`].
#[async_trait]
pub trait DbTransaction: Send {
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError>;

    /// Insert `rows` (one value per statement column) with conflict update.
    /// Returns rows written.
    async fn upsert(
        &mut self,
        statement: &UpsertStatement,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, DbError>;

    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}
