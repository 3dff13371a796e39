//! [`DbManager`] over a single `tokio-postgres` connection.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};

use crate::config::PgConfig;
use crate::db::{DbManager, DbTransaction};
use crate::error::DbError;
use crate::statement::UpsertStatement;
use crate::value::SqlValue;

/// A Postgres database reached through one shared connection.
///
/// Transactions hold the connection exclusively until they commit or roll
/// back, so concurrent batches serialize their writes.
#[derive(Clone)]
pub struct PgDatabase {
    client: Arc<Mutex<Client>>,
    target: String,
}

impl std::fmt::Debug for PgDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgDatabase")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl PgDatabase {
    /// Connect using `config` and drive the connection on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the server cannot be reached or
    /// rejects the credentials.
    pub async fn connect(config: &PgConfig) -> Result<Self, DbError> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host);
        pg.port(config.port);
        pg.user(&config.user);
        if !config.password.is_empty() {
            pg.password(&config.password);
        }
        pg.dbname(&config.database);

        let target = config.display_target();
        let (client, connection) = pg
            .connect(NoTls)
            .await
            .map_err(|e| DbError::Connection(format!("{target}: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "PostgreSQL connection error");
            }
        });

        tracing::debug!(target = %target, "connected to PostgreSQL");
        Ok(Self::from_client(client, target))
    }

    #[must_use]
    pub fn from_client(client: Client, target: impl Into<String>) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
            target: target.into(),
        }
    }
}

fn bind_params(params: &[SqlValue]) -> Result<Vec<&(dyn ToSql + Sync)>, DbError> {
    params
        .iter()
        .map(|p| {
            p.as_tosql()
                .ok_or_else(|| DbError::Query("untyped NULL cannot be bound as a parameter".into()))
        })
        .collect()
}

fn column_value(row: &Row, idx: usize) -> Result<SqlValue, tokio_postgres::Error> {
    let value = match row.columns()[idx].type_().name() {
        "bool" => SqlValue::Bool(row.try_get(idx)?),
        "int2" => SqlValue::Int16(row.try_get(idx)?),
        "int4" => SqlValue::Int32(row.try_get(idx)?),
        "int8" => SqlValue::Int64(row.try_get(idx)?),
        "float4" => SqlValue::Float32(row.try_get(idx)?),
        "float8" => SqlValue::Float64(row.try_get(idx)?),
        "date" => SqlValue::Date(row.try_get(idx)?),
        "timestamp" => SqlValue::Timestamp(row.try_get(idx)?),
        "timestamptz" => SqlValue::TimestampTz(row.try_get(idx)?),
        "bytea" => SqlValue::Bytes(row.try_get(idx)?),
        _ => SqlValue::Text(row.try_get(idx)?),
    };
    Ok(value)
}

fn row_values(row: &Row) -> Result<Vec<SqlValue>, DbError> {
    (0..row.len())
        .map(|idx| column_value(row, idx))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DbError::from_pg("failed to decode row", &e))
}

#[async_trait]
impl DbManager for PgDatabase {
    async fn execute(&self, sql: &str) -> Result<u64, DbError> {
        let client = self.client.lock().await;
        client
            .execute(sql, &[])
            .await
            .map_err(|e| DbError::from_pg("statement failed", &e))
    }

    async fn fetch(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Vec<SqlValue>>, DbError> {
        let refs = bind_params(params)?;
        let client = self.client.lock().await;
        let rows = client
            .query(sql, &refs)
            .await
            .map_err(|e| DbError::from_pg("query failed", &e))?;
        rows.iter().map(row_values).collect()
    }

    async fn transaction(&self) -> Result<Box<dyn DbTransaction>, DbError> {
        let client = Arc::clone(&self.client).lock_owned().await;
        client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| DbError::Transaction(format!("BEGIN failed: {e}")))?;
        Ok(Box::new(PgTransaction {
            client: Some(client),
        }))
    }
}

/// An open Postgres transaction holding the connection.
///
/// Dropping it without commit issues a `ROLLBACK` in the background.
pub struct PgTransaction {
    client: Option<OwnedMutexGuard<Client>>,
}

impl PgTransaction {
    fn client(&self) -> Result<&Client, DbError> {
        self.client
            .as_deref()
            .ok_or_else(|| DbError::Transaction("transaction already finished".into()))
    }
}

#[async_trait]
impl DbTransaction for PgTransaction {
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        self.client()?
            .execute(sql, &[])
            .await
            .map_err(|e| DbError::from_pg("statement failed", &e))
    }

    async fn upsert(
        &mut self,
        statement: &UpsertStatement,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, DbError> {
        let width = statement.columns.len();
        if let Some(row) = rows.iter().find(|row| row.len() != width) {
            return Err(DbError::Query(format!(
                "row has {} values for {width} columns",
                row.len()
            )));
        }

        let client = self.client()?;
        let mut written: u64 = 0;
        for chunk in rows.chunks(statement.rows_per_statement()) {
            let (sql, params) = statement.render(chunk);
            client.execute(&sql, &params).await.map_err(|e| {
                DbError::from_pg(&format!("UPSERT into {} failed", statement.table), &e)
            })?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), DbError> {
        let Some(client) = self.client.take() else {
            return Err(DbError::Transaction("transaction already finished".into()));
        };
        if let Err(e) = client.batch_execute("COMMIT").await {
            let _ = client.batch_execute("ROLLBACK").await;
            return Err(DbError::Transaction(format!("COMMIT failed: {e}")));
        }
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), DbError> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        client
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| DbError::Transaction(format!("ROLLBACK failed: {e}")))
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = client.batch_execute("ROLLBACK").await {
                    tracing::warn!(error = %e, "rollback of abandoned transaction failed");
                }
            });
        }
    }
}
