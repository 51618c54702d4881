mod cli;
mod output;
mod simulate;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, LogFormatArg};
use colored::Colorize;
use config_engine::{ConfigError, ConfigLoader, HeirloomConfig};
use heirloom_sync::{ReplicaTracker, SyncSettings};
use logger_redacted::{init_tracing, LogFormat};
use std::sync::Arc;
use tracing::info;

fn load_config(cli: &Cli) -> Result<HeirloomConfig, ConfigError> {
    let loader = ConfigLoader::new();
    match &cli.global.config {
        Some(path) => loader.with_file(path).load(),
        None => loader.load(),
    }
}

fn regions(settings: &SyncSettings) {
    let tracker = ReplicaTracker::new(
        settings.primary_region,
        &settings.sync_regions,
        Arc::new(settings.latency_model()),
    );
    output::region_table(&tracker.snapshot());
}

fn check_config(cli: &Cli) -> Result<()> {
    match load_config(cli) {
        Ok(config) => {
            println!("{} configuration is valid", "ok".green().bold());
            println!("   primary region: {}", config.sync.primary_region);
            let secondaries: Vec<&str> = config
                .sync
                .sync_regions
                .iter()
                .map(|region| region.as_str())
                .collect();
            println!("   sync regions:   {}", secondaries.join(", "));
            println!("   sync enabled:   {}", config.sync.enabled);
            Ok(())
        }
        Err(ConfigError::Invalid(problems)) => {
            println!("{} configuration is invalid", "error".red().bold());
            for problem in &problems {
                println!("   - {problem}");
            }
            anyhow::bail!("{} configuration problem(s)", problems.len())
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::CheckConfig = cli.command {
        return check_config(&cli);
    }

    let mut config = load_config(&cli).context("failed to load configuration")?;
    if let Some(format) = cli.global.log_format {
        config.logging.format = match format {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        };
    }
    init_tracing(&config.logging)?;
    info!(
        config = ?cli.global.config,
        primary = %config.sync.primary_region,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Simulate(args) => simulate::run(config.sync, args).await?,
        Commands::Regions => regions(&config.sync),
        Commands::CheckConfig => {}
    }

    Ok(())
}
