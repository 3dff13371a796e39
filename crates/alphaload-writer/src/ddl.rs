//! Destination table preparation from a cleaned batch's Arrow schema.

use arrow::datatypes::{DataType, Schema};

use crate::db::DbManager;
use crate::decode::bindable_type;
use crate::error::DbError;
use crate::statement::{ColumnDefinition, QualifiedTable, TableDefinition};

/// Postgres column type for an Arrow type, after bindable normalization.
#[must_use]
pub fn arrow_to_pg_type(dt: &DataType) -> &'static str {
    match bindable_type(dt) {
        DataType::Int16 => "SMALLINT",
        DataType::Int32 => "INTEGER",
        DataType::Int64 => "BIGINT",
        DataType::Float32 => "REAL",
        DataType::Float64 => "DOUBLE PRECISION",
        DataType::Boolean => "BOOLEAN",
        DataType::Date32 => "DATE",
        DataType::Timestamp(_, Some(_)) => "TIMESTAMPTZ",
        DataType::Timestamp(_, None) => "TIMESTAMP",
        DataType::Binary => "BYTEA",
        _ => "TEXT",
    }
}

/// Table shape for `schema`, keyed on `primary_keys`. Key columns are NOT NULL.
#[must_use]
pub fn table_definition(
    table: &QualifiedTable,
    schema: &Schema,
    primary_keys: &[String],
) -> TableDefinition {
    TableDefinition {
        table: table.clone(),
        columns: schema
            .fields()
            .iter()
            .map(|field| ColumnDefinition {
                name: field.name().clone(),
                pg_type: arrow_to_pg_type(field.data_type()).to_string(),
                nullable: !primary_keys.contains(field.name()),
            })
            .collect(),
        primary_keys: primary_keys.to_vec(),
    }
}

/// Create the destination table if needed and add any column it lacks.
///
/// # Errors
///
/// Returns the database error of the first failing DDL statement.
pub async fn ensure_table(
    db: &dyn DbManager,
    table: &QualifiedTable,
    schema: &Schema,
    primary_keys: &[String],
) -> Result<(), DbError> {
    let definition = table_definition(table, schema, primary_keys);
    db.create_table(&definition).await?;
    tracing::debug!(
        table = %table,
        columns = definition.columns.len(),
        "destination table ready"
    );
    Ok(())
}
