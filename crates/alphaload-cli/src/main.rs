mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "alphaload",
    version,
    about = "Batch planner and clean-layer loader for market data ingestion"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace) or a filter directive
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the planned parameter records of a task as JSON lines
    Plan {
        /// Path to task YAML file
        task: PathBuf,
    },
    /// Validate task configuration and destination connectivity
    Check {
        /// Path to task YAML file
        task: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Plan { task } => commands::plan::execute(&task).await,
        Commands::Check { task } => commands::check::execute(&task).await,
    }
}
