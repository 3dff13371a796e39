pub mod check;
pub mod plan;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use alphaload_engine::config::{parser, validator, TaskConfig};
use alphaload_writer::{DbManager, PgDatabase};

/// Parse and validate a task file.
fn load_task(path: &Path) -> Result<TaskConfig> {
    let config = parser::parse_task(path)
        .with_context(|| format!("Failed to parse task: {}", path.display()))?;
    validator::validate_task(&config)?;
    Ok(config)
}

async fn connect(config: &TaskConfig) -> Result<Arc<dyn DbManager>> {
    let db = PgDatabase::connect(&config.destination)
        .await
        .with_context(|| format!("Failed to connect to {}", config.destination.display_target()))?;
    Ok(Arc::new(db))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_task_reports_validation_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
version: "2.0"
task: daily
table: daily
primary_keys: []
destination:
  host: localhost
  user: loader
  database: market
planning:
  strategy: smart_time
  start_date: "20230101"
  end_date: "20230131"
lineage:
  source_tables: [daily]
"#
        )
        .unwrap();
        let err = format!("{:#}", load_task(file.path()).unwrap_err());
        assert!(err.contains("Unsupported task version '2.0'"));
        assert!(err.contains("primary key column is required"));
    }

    #[test]
    fn load_task_names_unreadable_file() {
        let err = format!("{:#}", load_task(Path::new("/nonexistent/task.yaml")).unwrap_err());
        assert!(err.contains("Failed to parse task: /nonexistent/task.yaml"));
    }
}
