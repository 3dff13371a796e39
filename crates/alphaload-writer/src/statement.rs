//! Structured statements and their Postgres SQL rendering.

use std::fmt;
use std::fmt::Write as _;

use pg_escape::quote_identifier;
use tokio_postgres::types::ToSql;

use crate::value::SqlValue;

/// Maximum rows per multi-value INSERT statement.
pub const MAX_ROWS_PER_STATEMENT: usize = 1000;

/// Postgres limit on bind parameters in one statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedTable {
    pub schema: String,
    pub name: String,
}

impl QualifiedTable {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parse `schema.table`, or a bare `table` in `default_schema`.
    #[must_use]
    pub fn parse(value: &str, default_schema: &str) -> Self {
        match value.split_once('.') {
            Some((schema, name)) => Self::new(schema, name),
            None => Self::new(default_schema, value),
        }
    }

    /// `"schema"."table"`, quoted for SQL.
    #[must_use]
    pub fn quoted(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.name)
        )
    }
}

impl fmt::Display for QualifiedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// INSERT ... ON CONFLICT over a fixed column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertStatement {
    pub table: QualifiedTable,
    pub columns: Vec<String>,
    pub primary_keys: Vec<String>,
}

impl UpsertStatement {
    #[must_use]
    pub fn new(table: QualifiedTable, columns: Vec<String>, primary_keys: Vec<String>) -> Self {
        Self {
            table,
            columns,
            primary_keys,
        }
    }

    /// Columns overwritten on conflict: every column that is not a key.
    pub fn update_columns(&self) -> impl Iterator<Item = &String> {
        self.columns
            .iter()
            .filter(|c| !self.primary_keys.contains(*c))
    }

    /// Rows that fit one statement under both the row cap and the bind
    /// parameter limit.
    #[must_use]
    pub fn rows_per_statement(&self) -> usize {
        (MAX_BIND_PARAMS / self.columns.len().max(1)).clamp(1, MAX_ROWS_PER_STATEMENT)
    }

    #[must_use]
    pub fn conflict_clause(&self) -> String {
        let pk_cols = self
            .primary_keys
            .iter()
            .map(|k| quote_identifier(k))
            .collect::<Vec<_>>()
            .join(", ");
        let updates: Vec<String> = self
            .update_columns()
            .map(|name| {
                format!(
                    "{} = EXCLUDED.{}",
                    quote_identifier(name),
                    quote_identifier(name)
                )
            })
            .collect();
        if updates.is_empty() {
            format!(" ON CONFLICT ({pk_cols}) DO NOTHING")
        } else {
            format!(" ON CONFLICT ({pk_cols}) DO UPDATE SET {}", updates.join(", "))
        }
    }

    /// Render one multi-value statement for `rows` and the bind parameters
    /// it references. Untyped NULLs are written inline.
    #[must_use]
    pub fn render<'a>(&self, rows: &'a [Vec<SqlValue>]) -> (String, Vec<&'a (dyn ToSql + Sync)>) {
        let col_list = self
            .columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let header = format!("INSERT INTO {} ({col_list}) VALUES ", self.table.quoted());
        let mut sql = String::with_capacity(header.len() + rows.len() * self.columns.len() * 6);
        sql.push_str(&header);

        let mut params: Vec<&'a (dyn ToSql + Sync)> =
            Vec::with_capacity(rows.len().saturating_mul(self.columns.len()));
        for (row_idx, row) in rows.iter().enumerate() {
            if row_idx > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for (pos, value) in row.iter().enumerate() {
                if pos > 0 {
                    sql.push_str(", ");
                }
                if let Some(param) = value.as_tosql() {
                    params.push(param);
                    let _ = write!(sql, "${}", params.len());
                } else {
                    sql.push_str("NULL");
                }
            }
            sql.push(')');
        }
        sql.push_str(&self.conflict_clause());
        (sql, params)
    }
}

/// One column of a destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub pg_type: String,
    pub nullable: bool,
}

/// Shape of a destination table derived from a cleaned batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub table: QualifiedTable,
    pub columns: Vec<ColumnDefinition>,
    pub primary_keys: Vec<String>,
}

impl TableDefinition {
    /// Idempotent DDL: create schema, create table, then add any column the
    /// table does not have yet.
    #[must_use]
    pub fn ddl_statements(&self) -> Vec<String> {
        let qualified = self.table.quoted();
        let mut statements = vec![format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_identifier(&self.table.schema)
        )];

        let mut parts: Vec<String> = self.columns.iter().map(column_ddl).collect();
        if !self.primary_keys.is_empty() {
            let pk = self
                .primary_keys
                .iter()
                .map(|k| quote_identifier(k))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("PRIMARY KEY ({pk})"));
        }
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {qualified} ({})",
            parts.join(", ")
        ));

        for column in &self.columns {
            statements.push(format!(
                "ALTER TABLE {qualified} ADD COLUMN IF NOT EXISTS {} {}",
                quote_identifier(&column.name),
                column.pg_type
            ));
        }
        statements
    }
}

fn column_ddl(column: &ColumnDefinition) -> String {
    let nullable = if column.nullable { "" } else { " NOT NULL" };
    format!(
        "{} {}{nullable}",
        quote_identifier(&column.name),
        column.pg_type
    )
}
