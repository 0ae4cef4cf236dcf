mod host;
mod workload;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use workload::WorkloadConfig;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Cadence cooperative scheduler host", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workload through the simulated frame loop
    Run {
        /// Workload description (JSON)
        workload: PathBuf,
        /// Override the number of frames
        #[arg(long)]
        frames: Option<u32>,
        /// Override the frame budget in milliseconds
        #[arg(long)]
        frame_budget_ms: Option<u64>,
    },
    /// Validate a workload and print it back
    Check {
        /// Workload description (JSON)
        workload: PathBuf,
    },
}

fn load(path: &PathBuf) -> Result<WorkloadConfig> {
    WorkloadConfig::from_path(path)
        .with_context(|| format!("failed to load workload {}", path.display()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Run {
            workload,
            frames,
            frame_budget_ms,
        } => {
            let mut config = load(&workload)?;
            config.apply_overrides(frames, frame_budget_ms)?;

            tracing::info!(path = %workload.display(), frames = config.frames, "running workload");
            let stats = host::run(&config).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Check { workload } => {
            let config = load(&workload)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
