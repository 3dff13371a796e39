use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use alphaload_engine::planner::plan_from_config;
use alphaload_types::ParamRecord;

/// Execute the `plan` command: print one JSON object per planned batch.
pub async fn execute(task_path: &Path) -> Result<()> {
    let config = super::load_task(task_path)?;
    let db = if config.planning.needs_database() {
        Some(super::connect(&config).await?)
    } else {
        None
    };

    let records = plan_from_config(&config.planning, &config.destination_table(), db)
        .await
        .with_context(|| format!("Failed to plan task '{}'", config.task))?;

    tracing::info!(task = %config.task, batches = records.len(), "Task planned");

    let stdout = std::io::stdout();
    write_records(&mut stdout.lock(), &records)
}

fn write_records(out: &mut impl Write, records: &[ParamRecord]) -> Result<()> {
    for record in records {
        serde_json::to_writer(&mut *out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_json_object_per_line() {
        let records = vec![
            ParamRecord::new().with("start_date", "20230101").with("end_date", "20230131"),
            ParamRecord::new().with("start_date", "20230201").with("end_date", "20230215"),
        ];
        let mut out = Vec::new();
        write_records(&mut out, &records).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"end_date":"20230131","start_date":"20230101"}"#);
    }
}
