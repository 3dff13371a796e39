//! Writer error types.

/// Failure reported by a [`crate::DbManager`] or one of its transactions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DbError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    /// The server refused the rows themselves. Resending them cannot succeed.
    #[error("rows rejected: {0}")]
    Constraint(String),
}

impl DbError {
    /// Render a `tokio-postgres` error with SQLSTATE and server detail when
    /// the server produced one.
    #[must_use]
    pub fn from_pg(prefix: &str, error: &tokio_postgres::Error) -> Self {
        if let Some(db_error) = error.as_db_error() {
            let sqlstate = db_error.code().code();
            let message = format!(
                "{prefix}: {} (sqlstate={sqlstate} detail={} hint={})",
                db_error.message(),
                db_error.detail().unwrap_or("n/a"),
                db_error.hint().unwrap_or("n/a"),
            );
            if is_data_sqlstate(sqlstate) {
                Self::Constraint(message)
            } else {
                Self::Query(message)
            }
        } else if error.is_closed() {
            Self::Connection(format!("{prefix}: {error}"))
        } else {
            Self::Query(format!("{prefix}: {error}"))
        }
    }

    /// Whether the same statement may succeed when sent again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Constraint(_))
    }
}

/// Integrity constraint violations (class 23), data exceptions (class 22)
/// and cardinality violations such as a row updated twice by one
/// `ON CONFLICT DO UPDATE` (21000).
fn is_data_sqlstate(sqlstate: &str) -> bool {
    sqlstate.starts_with("23") || sqlstate.starts_with("22") || sqlstate == "21000"
}

/// Failure of [`crate::CleanLayerWriter::upsert`].
///
/// Sub-batches committed before the failing one stay committed.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("sub-batch {sub_batch} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        sub_batch: usize,
        attempts: u32,
        #[source]
        source: DbError,
    },

    #[error("sub-batch {sub_batch} rejected by the database: {source}")]
    Rejected {
        sub_batch: usize,
        #[source]
        source: DbError,
    },

    #[error("conflict strategy '{0}' is not supported")]
    UnsupportedStrategy(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cannot convert batch to SQL values: {0}")]
    Decode(String),

    #[error("write cancelled after {committed_rows} committed row(s)")]
    Cancelled { committed_rows: u64 },

    #[error("failed to prepare destination table: {0}")]
    Schema(#[source] DbError),
}

impl From<arrow::error::ArrowError> for WriteError {
    fn from(e: arrow::error::ArrowError) -> Self {
        Self::Decode(e.to_string())
    }
}
