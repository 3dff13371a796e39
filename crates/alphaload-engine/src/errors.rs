//! Planning error model.

/// Errors raised while turning a task into parameter records.
///
/// All of these are fatal for the task: the engine reports them as a
/// `failed` [`TaskResult`](alphaload_types::TaskResult) without running any batch.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// A strategy or engine was constructed with an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A date range is unparsable or reversed.
    #[error("invalid date range: {0}")]
    InvalidDateRange(String),

    /// The item source (code list, calendar, destination lookup) failed.
    #[error("item source failed: {0:#}")]
    Source(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn source_error_shows_context_chain() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("connection refused"));
        let err = PlanError::Source(err.context("listing codes").unwrap_err());
        assert_eq!(err.to_string(), "item source failed: listing codes: connection refused");
    }
}
