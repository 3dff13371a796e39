//! Task YAML configuration types.

use alphaload_clean::{CleanConfig, LineageConfig};
use alphaload_types::{ParamRecord, TableSchema};
use alphaload_writer::{ConflictStrategy, PgConfig, QualifiedTable, WriterConfig};
use serde::{Deserialize, Serialize};

/// Top-level task configuration parsed from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub version: String,
    pub task: String,
    /// Destination table, `schema.table` or bare (in `destination.schema`).
    pub table: String,
    pub primary_keys: Vec<String>,
    pub destination: PgConfig,
    pub planning: PlanningConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub schema: TableSchema,
    #[serde(default)]
    pub clean: CleanConfig,
    pub lineage: LineageConfig,
    #[serde(default)]
    pub on_conflict: ConflictStrategy,
}

impl TaskConfig {
    #[must_use]
    pub fn destination_table(&self) -> QualifiedTable {
        QualifiedTable::parse(&self.table, &self.destination.schema)
    }

    #[must_use]
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            batch_size: self.resources.write_batch_size,
            max_retries: self.resources.max_retries,
            retry_base: self.resources.retry_base_secs,
        }
    }

    /// The schema batches are cleaned against. Its key defaults to the
    /// destination's `primary_keys` so rows are deduplicated on the same
    /// columns the UPSERT conflicts on.
    #[must_use]
    pub fn table_schema(&self) -> TableSchema {
        let mut schema = self.schema.clone();
        if schema.primary_keys.is_empty() {
            schema.primary_keys.clone_from(&self.primary_keys);
        }
        schema
    }

    /// Column the latest loaded date is read from, if any.
    #[must_use]
    pub fn date_column(&self) -> Option<&str> {
        self.planning.incremental_column.as_deref().or_else(|| {
            self.clean
                .date
                .as_ref()
                .map(|_| alphaload_types::columns::TRADE_DATE)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanningStrategy {
    /// Split `[start_date, end_date]` with the four-tier date splitter.
    SmartTime,
    /// Fixed-size chunks of calendar days or entities.
    BySize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapKind {
    DateRange,
    SingleEntity,
    JoinedEntities,
}

fn default_entity_key() -> String {
    "ts_code".to_string()
}

/// How the task is split into parameter records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningConfig {
    pub strategy: PlanningStrategy,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    /// Fixed entity list.
    #[serde(default)]
    pub entities: Vec<String>,
    /// Query listing entity codes in its first column.
    #[serde(default)]
    pub entity_query: Option<String>,
    #[serde(default = "default_entity_key")]
    pub entity_key: String,
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Defaults to `date_range` for dates, `single_entity` for one entity per
    /// batch and `joined_entities` otherwise.
    #[serde(default)]
    pub map: Option<MapKind>,
    /// Resume after `MAX(column)` of the destination table.
    #[serde(default)]
    pub incremental_column: Option<String>,
    /// Merged into every record; wins over mapped keys.
    #[serde(default)]
    pub extra_params: ParamRecord,
}

impl PlanningConfig {
    #[must_use]
    pub fn uses_entities(&self) -> bool {
        !self.entities.is_empty() || self.entity_query.is_some()
    }

    #[must_use]
    pub fn map_kind(&self) -> MapKind {
        self.map.unwrap_or(if !self.uses_entities() {
            MapKind::DateRange
        } else if self.batch_size.unwrap_or(1) == 1 {
            MapKind::SingleEntity
        } else {
            MapKind::JoinedEntities
        })
    }

    /// Planning reads from the destination database.
    #[must_use]
    pub fn needs_database(&self) -> bool {
        self.entity_query.is_some() || self.incremental_column.is_some()
    }
}

/// Concurrency and write tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_write_batch_size")]
    pub write_batch_size: usize,
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: f64,
}

fn default_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    3
}
fn default_write_batch_size() -> usize {
    10_000
}
fn default_retry_base_secs() -> f64 {
    2.0
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            write_batch_size: default_write_batch_size(),
            retry_base_secs: default_retry_base_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alphaload_clean::ValidationPolicy;
    use alphaload_types::ColumnType;

    const MINIMAL: &str = r#"
version: "1.0"
task: daily_quotes
table: clean.daily
primary_keys: [ts_code, trade_date]
destination:
  host: localhost
  user: loader
  database: market
planning:
  strategy: smart_time
  start_date: "20230101"
  end_date: "20231231"
lineage:
  source_tables: [daily]
"#;

    #[test]
    fn minimal_task_gets_defaults() {
        let config: TaskConfig = serde_yaml::from_str(MINIMAL).unwrap();
        assert_eq!(config.resources, ResourceConfig::default());
        assert_eq!(config.resources.concurrency, 4);
        assert_eq!(config.on_conflict, ConflictStrategy::Replace);
        assert_eq!(config.destination.port, 5432);
        assert_eq!(config.clean.on_invalid, ValidationPolicy::Abort);
        assert_eq!(config.planning.map_kind(), MapKind::DateRange);
        assert_eq!(config.destination_table(), QualifiedTable::new("clean", "daily"));
        assert_eq!(config.writer_config(), WriterConfig::default());
        assert_eq!(config.date_column(), None);
        assert!(config.schema.primary_keys.is_empty());
        assert_eq!(config.table_schema().primary_keys, config.primary_keys);
    }

    #[test]
    fn full_task_parses_every_section() {
        let yaml = r#"
version: "1.0"
task: daily_basic
table: daily_basic
primary_keys: [ts_code, trade_date]
destination:
  host: db.internal
  port: 6432
  user: loader
  password: secret
  database: market
  schema: clean
planning:
  strategy: by_size
  entity_query: SELECT ts_code FROM stock_basic
  batch_size: 50
  extra_params:
    fields: ts_code,trade_date,close,amount
resources:
  concurrency: 8
  max_retries: 5
  write_batch_size: 2000
  retry_base_secs: 1.5
schema:
  required_columns: [ts_code, trade_date, close]
  column_types:
    close: float
  value_ranges:
    close: [0, 100000]
  primary_keys: [ts_code, trade_date]
clean:
  date:
    column: trade_date
  identifier:
    column: ts_code
  monetary:
    - columns: [amount]
      unit: 万元
  on_invalid: flag
lineage:
  source_tables: [daily_basic]
  data_version: v2
"#;
        let config: TaskConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.destination_table(), QualifiedTable::new("clean", "daily_basic"));
        assert_eq!(config.planning.map_kind(), MapKind::JoinedEntities);
        assert!(config.planning.needs_database());
        assert_eq!(
            config.planning.extra_params.get_str("fields"),
            Some("ts_code,trade_date,close,amount")
        );
        assert_eq!(config.resources.concurrency, 8);
        assert_eq!(config.writer_config().batch_size, 2000);
        assert_eq!(config.schema.column_types["close"], ColumnType::Float);
        assert_eq!(config.clean.on_invalid, ValidationPolicy::Flag);
        assert_eq!(config.lineage.data_version.as_deref(), Some("v2"));
        assert_eq!(config.date_column(), Some("trade_date"));
    }

    #[test]
    fn single_entity_is_default_for_one_code_per_batch() {
        let planning: PlanningConfig =
            serde_yaml::from_str("strategy: by_size\nentities: [600000.SH]\nbatch_size: 1\n").unwrap();
        assert_eq!(planning.map_kind(), MapKind::SingleEntity);
        assert!(!planning.needs_database());
    }
}
