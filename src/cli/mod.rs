//! CLI module for netgauge
//!
//! Command-line interface definitions and handlers.
//!
//! # Commands
//!
//! - `watch` - Run the engine continuously and print status lines
//! - `probe` - Run one full measurement cycle and print the result
//! - `config` - Configuration utilities (init, check)
//! - `completions` - Generate shell completions
//!
//! # Example
//!
//! ```bash
//! # Watch with a status line every 10 seconds
//! netgauge watch --status-seconds 10
//!
//! # One-off measurement as JSON
//! netgauge probe --json
//!
//! # Generate shell completions
//! netgauge completions bash > ~/.bash_completion.d/netgauge
//! ```

pub mod completions;
pub mod config;
pub mod output;
pub mod probe;
pub mod watch;

pub use completions::handle_completions;
pub use config::{handle_config_check, handle_config_init};

use crate::config::NetgaugeConfig;
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// netgauge - continuous network quality estimation
#[derive(Parser, Debug)]
#[command(
    name = "netgauge",
    version,
    about = "Continuously measures latency and throughput and scores link quality"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine until interrupted
    Watch(WatchArgs),
    /// Run a single full measurement
    Probe(ProbeArgs),
    /// Configuration utilities
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Path to configuration file
    #[arg(short, long, env = "NETGAUGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Print snapshots as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Seconds between status lines
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u64).range(1..))]
    pub status_seconds: u64,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Path to configuration file
    #[arg(short, long, env = "NETGAUGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Initialize a new configuration file
    Init(ConfigInitArgs),
    /// Validate a configuration file and show the resolved values
    Check(ConfigCheckArgs),
}

#[derive(Args, Debug)]
pub struct ConfigInitArgs {
    /// Output file path
    #[arg(short, long, default_value = "netgauge.toml")]
    pub output: PathBuf,

    /// Overwrite existing file
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigCheckArgs {
    /// Configuration file to check
    #[arg(default_value = "netgauge.toml")]
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

/// Load, apply environment overrides, normalize and validate.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<NetgaugeConfig> {
    let config = NetgaugeConfig::load(path)?
        .with_env_overrides()
        .normalized();
    config.validate()?;
    Ok(config)
}
