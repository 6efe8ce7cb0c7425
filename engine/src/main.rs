// ARC research pipeline engine
// Main entry point for the arc binary

use arc_engine::cli::{Cli, Command};
use arc_engine::config::Config;
use arc_engine::handlers::{
    handle_approve, handle_batch, handle_discover, handle_doctor, handle_research, handle_runs,
    handle_status, handle_weekly, OutputFormat,
};
use arc_engine::telemetry::init_telemetry_with_level;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log beats the config level; RUST_LOG beats both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("ARC Engine v{} ({} - {})", version, commit, timestamp);

    // Per-artifact and per-node failures are reported in the output; only a
    // top-level failure reaches the exit code.
    match cli.command {
        Command::Batch => handle_batch(&config, format).await,
        Command::Discover => handle_discover(&config, format).await,
        Command::Research { idea_id } => handle_research(idea_id, &config, format).await,
        Command::Approve { research_id } => handle_approve(research_id, &config, format).await,
        Command::Weekly => handle_weekly(&config, format).await,
        Command::Status { artifact_id } => handle_status(artifact_id, &config, format).await,
        Command::Runs { limit } => handle_runs(limit, &config, format).await,
        Command::Doctor => handle_doctor(&config, format).await,
    }
}
