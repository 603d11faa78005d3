use std::path::PathBuf;

use anyhow::Context;
use cadence_core::CadenceConfig;
use cadence_scheduler::Scheduler;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod app;
mod jobs;

/// Cadence: time-based job scheduler daemon.
#[derive(Parser)]
#[command(name = "cadence", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C (default).
    Run,

    /// List configured jobs and their next fire time.
    Jobs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cadence_daemon=info,cadence_scheduler=info")),
        )
        .init();

    let cli = Cli::parse();

    // explicit path > CADENCE_CONFIG env > ~/.cadence/cadence.toml
    let config_path = cli
        .config
        .map(|p| p.display().to_string())
        .or_else(|| std::env::var("CADENCE_CONFIG").ok());
    let config = CadenceConfig::load(config_path.as_deref()).context("failed to load config")?;

    let scheduler = app::build_scheduler(&config, jobs::builtin_registry())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(scheduler).await,
        Command::Jobs => {
            list_jobs(&scheduler);
            Ok(())
        }
    }
}

async fn run(scheduler: Scheduler) -> anyhow::Result<()> {
    scheduler.start()?;
    info!(
        jobs = scheduler.job_descriptors().len(),
        store = if scheduler.allows_modifications() { "sqlite" } else { "config" },
        "cadence scheduler running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    scheduler.shutdown();
    Ok(())
}

fn list_jobs(scheduler: &Scheduler) {
    let format = scheduler.date_format();
    let now = Utc::now();
    println!(
        "{:<24} {:<10} {:<24} {:<10} {:<8} {:>6}  NEXT RUN",
        "NAME", "SCHEDULE", "CONFIG", "JOB TYPE", "ENABLED", "RUNS"
    );
    for job in scheduler.job_descriptors() {
        let next = job
            .upcoming_run(now)
            .map(|t| format.format(t))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<10} {:<24} {:<10} {:<8} {:>6}  {}",
            job.name(),
            job.schedule_type(),
            job.schedule_config(),
            job.job_type(),
            job.is_enabled(),
            job.run_count(),
            next
        );
    }
}
