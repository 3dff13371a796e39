//! Task YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::TaskConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let substituted = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| {
            missing.push(cap[1].to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }
    Ok(substituted.into_owned())
}

/// Parse a task YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_task_str(yaml_str: &str) -> Result<TaskConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    serde_yaml::from_str(&substituted).context("Failed to parse task YAML")
}

/// Parse a task YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_task(path: &Path) -> Result<TaskConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read task file: {}", path.display()))?;
    parse_task_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn substitutes_set_variables() {
        std::env::set_var("AL_TEST_HOST", "db.example.com");
        let result = substitute_env_vars("host: ${AL_TEST_HOST}\nport: 5432").unwrap();
        assert_eq!(result, "host: db.example.com\nport: 5432");
        std::env::remove_var("AL_TEST_HOST");
    }

    #[test]
    fn text_without_variables_passes_through() {
        let input = "host: localhost\nport: 5432";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn reports_every_missing_variable() {
        let err = substitute_env_vars("${AL_MISSING_ONE} ${AL_MISSING_TWO}")
            .unwrap_err()
            .to_string();
        assert!(err.contains("AL_MISSING_ONE"));
        assert!(err.contains("AL_MISSING_TWO"));
    }

    #[test]
    fn parses_task_file_with_secrets_from_env() {
        std::env::set_var("AL_TEST_PG_PASS", "s3cret");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
version: "1.0"
task: daily
table: daily
primary_keys: [ts_code, trade_date]
destination:
  host: localhost
  user: loader
  password: ${{AL_TEST_PG_PASS}}
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

        let config = parse_task(file.path()).unwrap();
        assert_eq!(config.destination.password, "s3cret");
        assert_eq!(config.task, "daily");
        std::env::remove_var("AL_TEST_PG_PASS");
    }

    #[test]
    fn invalid_yaml_errors() {
        assert!(parse_task_str("this is not: [valid: yaml: {{{}}}").is_err());
    }

    #[test]
    fn missing_file_errors_with_path() {
        let err = parse_task(Path::new("/nonexistent/task.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read task file"));
    }
}
