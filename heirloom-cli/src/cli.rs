use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "heirloom")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Drive the Heirloom offline sync layer from the terminal")]
#[command(long_about = r#"
Runs the family-tree sync layer against an in-memory backend: replica
tracking, region sync, simulated outages and offline edits.

EXAMPLES:
  # Scripted session with a quick simulated transfer
  heirloom simulate --fast

  # Initial replica table for a config file
  heirloom --config heirloom.yaml regions

  # Validate a config file
  heirloom --config heirloom.yaml check-config

ENVIRONMENT VARIABLES:
  HEIRLOOM_CONFIG     Config file path
  HEIRLOOM__SYNC__*   Overrides for sync settings, e.g. HEIRLOOM__SYNC__PRIMARY_REGION
  RUST_LOG            Log filter, overrides the configured level
"#)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalOptions {
    /// YAML, TOML or JSON configuration file
    #[arg(short, long, env = "HEIRLOOM_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log output format, overriding the configuration
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormatArg>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scripted family session: edits, offline queueing, outage and recovery
    Simulate(SimulateArgs),

    /// Print the initial replica table
    Regions,

    /// Load and validate the configuration
    CheckConfig,
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Family whose tree is edited
    #[arg(long, default_value = "demo-family")]
    pub family: String,

    /// Probability that a region transfer fails
    #[arg(long)]
    pub failure_rate: Option<f64>,

    /// Shorten simulated transfers
    #[arg(long)]
    pub fast: bool,
}
