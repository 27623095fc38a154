//! Command line interface for the GIS engine.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// gis-engine - geo-spatial simulation core for network emulation
#[derive(Parser, Debug)]
#[command(
    name = "gis-engine",
    author,
    version,
    about = "Geo-spatial simulation core for network emulation",
    long_about = r#"
gis-engine keeps terminals, points of attachment and compute nodes in a
spatial store and drives them over time:

  - Terminals move along paths at a fixed velocity (LOOP or REVERSE)
  - Each terminal is attached to the best point of attachment in range
  - Automation emits mobility, in-range and network-characteristics events
  - A REST API under /gis/v1 exposes geodata and automation control

QUICK START:
  gis-engine serve --scenario monaco.json --automation MOVEMENT --automation MOBILITY
  gis-engine validate monaco.json
  gis-engine config --output gis-engine.toml
"#
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    pub log_level: String,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine and its HTTP API
    Serve(ServeArgs),

    /// Check a scenario file
    Validate(ValidateArgs),

    /// Show example configuration
    Config(ConfigArgs),
}

/// Serve command arguments
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Scenario to activate at startup
    #[arg(short, long)]
    pub scenario: Option<PathBuf>,

    /// API bind address (overrides config)
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,

    /// Automation type to enable (can be specified multiple times)
    #[arg(short, long = "automation")]
    pub automation: Vec<String>,

    /// Spatial store file (overrides config)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Run without the HTTP API
    #[arg(long)]
    pub no_api: bool,
}

/// Validate command arguments
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Scenario file (JSON)
    pub scenario: PathBuf,
}

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Output path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
