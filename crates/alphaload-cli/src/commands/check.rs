use std::path::Path;

use anyhow::Result;
use alphaload_engine::planner::{latest_loaded_date, plan_from_config};

/// Execute the `check` command: validate the task and check the destination.
pub async fn execute(task_path: &Path) -> Result<()> {
    let config = super::load_task(task_path)?;
    println!("Task structure:    OK");

    let db = match super::connect(&config).await {
        Ok(db) => {
            println!("Destination:       OK ({})", config.destination.display_target());
            db
        }
        Err(e) => {
            println!("Destination:       FAILED");
            println!("  {e:#}");
            anyhow::bail!("One or more checks failed");
        }
    };

    let table = config.destination_table();
    let mut ok = true;
    match db.table_exists(&table).await {
        Ok(true) => println!("Table {table}: exists"),
        Ok(false) => println!("Table {table}: missing (created on first write)"),
        Err(e) => {
            ok = false;
            println!("Table {table}: FAILED");
            println!("  {e}");
        }
    }

    if let Some(column) = config.date_column() {
        match latest_loaded_date(db.as_ref(), &table, column).await {
            Ok(Some(date)) => println!("Latest {column}: {}", date.format("%Y%m%d")),
            Ok(None) => println!("Latest {column}: none loaded"),
            Err(e) => {
                ok = false;
                println!("Latest {column}: FAILED");
                println!("  {e}");
            }
        }
    }

    match plan_from_config(&config.planning, &table, Some(db)).await {
        Ok(records) => println!("Planned batches:   {}", records.len()),
        Err(e) => {
            ok = false;
            println!("Planning:          FAILED");
            println!("  {e}");
        }
    }

    if ok {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        anyhow::bail!("One or more checks failed")
    }
}
