//! Semantic validation for parsed task configuration values.

use anyhow::{bail, Result};
use alphaload_writer::ConflictStrategy;

use crate::config::types::{MapKind, PlanningConfig, PlanningStrategy, TaskConfig};
use crate::partition::parse_yyyymmdd;

fn validate_dates(planning: &PlanningConfig, errors: &mut Vec<String>) {
    let (Some(start), Some(end)) = (&planning.start_date, &planning.end_date) else {
        errors.push("planning: date planning requires start_date and end_date".to_string());
        return;
    };
    match (parse_yyyymmdd(start), parse_yyyymmdd(end)) {
        (Ok(start), Ok(end)) if start > end => {
            errors.push(format!(
                "planning: start_date {} is after end_date {}",
                start.format("%Y%m%d"),
                end.format("%Y%m%d")
            ));
        }
        (Ok(_), Ok(_)) => {}
        (start_result, end_result) => {
            for err in [start_result.err(), end_result.err()].into_iter().flatten() {
                errors.push(format!("planning: {err}"));
            }
        }
    }
}

fn validate_planning(planning: &PlanningConfig, errors: &mut Vec<String>) {
    let entities = planning.uses_entities();
    if !planning.entities.is_empty() && planning.entity_query.is_some() {
        errors.push("planning: set either entities or entity_query, not both".to_string());
    }
    if planning
        .entity_query
        .as_ref()
        .is_some_and(|q| q.trim().is_empty())
    {
        errors.push("planning: entity_query must not be empty".to_string());
    }

    match planning.strategy {
        PlanningStrategy::SmartTime => {
            if entities {
                errors.push("planning: smart_time splits dates and cannot use entities".to_string());
            }
            validate_dates(planning, errors);
        }
        PlanningStrategy::BySize => {
            match planning.batch_size {
                None => errors.push("planning: by_size requires batch_size".to_string()),
                Some(0) => errors.push("planning: batch_size must be at least 1".to_string()),
                Some(_) => {}
            }
            if !entities {
                validate_dates(planning, errors);
            }
        }
    }

    match (planning.map_kind(), entities) {
        (MapKind::DateRange, true) => {
            errors.push("planning: map 'date_range' cannot be used with entities".to_string());
        }
        (MapKind::SingleEntity | MapKind::JoinedEntities, false) => {
            errors.push("planning: entity maps require entities or entity_query".to_string());
        }
        (MapKind::SingleEntity, true) if planning.batch_size.unwrap_or(1) != 1 => {
            errors.push("planning: map 'single_entity' requires batch_size 1".to_string());
        }
        _ => {}
    }

    if planning.incremental_column.is_some() && entities {
        errors.push("planning: incremental_column only applies to date planning".to_string());
    }
}

/// Validate a parsed task configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the task config.
pub fn validate_task(config: &TaskConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported task version '{}', expected '1.0'",
            config.version
        ));
    }
    if config.task.trim().is_empty() {
        errors.push("Task name must not be empty".to_string());
    }
    if config.table.trim().is_empty() {
        errors.push("Destination table must not be empty".to_string());
    }
    if config.primary_keys.is_empty() {
        errors.push("At least one primary key column is required".to_string());
    }
    if config.on_conflict == ConflictStrategy::Merge {
        errors.push("on_conflict 'merge' is not supported, use 'replace'".to_string());
    }
    if !config.schema.primary_keys.is_empty() && config.schema.primary_keys != config.primary_keys {
        errors.push("schema.primary_keys must match primary_keys".to_string());
    }

    errors.extend(config.destination.problems());
    validate_planning(&config.planning, &mut errors);

    if config.resources.concurrency == 0 {
        errors.push("resources.concurrency must be at least 1".to_string());
    }
    if config.resources.write_batch_size == 0 {
        errors.push("resources.write_batch_size must be at least 1".to_string());
    }
    if !(config.resources.retry_base_secs.is_finite() && config.resources.retry_base_secs >= 0.0) {
        errors.push("resources.retry_base_secs must be a non-negative number".to_string());
    }

    if config.lineage.source_tables.is_empty() {
        errors.push("lineage.source_tables must list at least one table".to_string());
    }
    for (column, range) in &config.schema.value_ranges {
        if range.min > range.max {
            errors.push(format!("schema.value_ranges.{column}: min is greater than max"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Task validation failed:\n  - {}", errors.join("\n  - "));
    }
}
