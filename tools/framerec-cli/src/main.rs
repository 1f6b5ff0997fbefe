//! FrameRec CLI: record encoded test streams and inspect the local setup.
//!
//! Usage:
//!   framerec record [OPTIONS]   Encode a generated test pattern
//!   framerec check              Report which encoder backends are usable
//!   framerec config             Print the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use framerec_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "framerec",
    about = "Frame-by-frame video recorder with pluggable encoder backends",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to $XDG_CONFIG_HOME/framerec/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a generated test pattern
    Record(commands::record::RecordArgs),

    /// Check encoder backend availability
    Check,

    /// Print the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .map_err(|e| anyhow::anyhow!("Failed to load {}: {e}", path.display()))?,
        None => AppConfig::load(),
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    framerec_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Record(args) => commands::record::run(args, &config.encoder).await,
        Commands::Check => commands::check::run(),
        Commands::Config { save } => commands::config::run(&config, cli.config, save),
    }
}
