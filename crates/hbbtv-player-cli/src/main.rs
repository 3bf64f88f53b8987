//! HbbTV Player CLI - Headless driver for the playback core
//!
//! Features:
//! - Playback type detection for source URLs
//! - Scripted playback simulation against in-memory engines
//! - Configuration inspection

use clap::{Parser, Subcommand};
use hbbtv_player_core::PlayerConfig;
use std::path::PathBuf;

mod commands;
mod output;

/// HbbTV Player CLI - playback core toolkit
#[derive(Parser)]
#[command(name = "hbbtv-player")]
#[command(version)]
#[command(about = "Drive the HbbTV playback core from the command line", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Player configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the playback type of one or more URLs
    Detect {
        /// Source URLs
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Simulate a playback session and print every state transition
    Simulate {
        /// Source URL (.mp4, .m3u8, .mpd, ...)
        url: String,

        /// Media duration in seconds
        #[arg(short, long, default_value = "120")]
        duration: f64,

        /// Seek target in seconds (defaults to half the duration)
        #[arg(short, long)]
        seek: Option<f64>,

        /// Number of manifest failures injected before parsing succeeds
        #[arg(long, default_value = "0")]
        manifest_failures: u32,

        /// Refuse playback as a user agent without a gesture would
        #[arg(long)]
        block_autoplay: bool,
    },

    /// Print the effective configuration
    Config,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<PlayerConfig> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)?;
            Ok(PlayerConfig::from_json(&json)?)
        }
        None => Ok(PlayerConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG wins over --verbose
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    hbbtv_player_core::init();

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Detect { urls } => {
            commands::detect(&urls, &cli.format)?;
        }
        Commands::Simulate {
            url,
            duration,
            seek,
            manifest_failures,
            block_autoplay,
        } => {
            let options = commands::SimulateOptions {
                duration,
                seek,
                manifest_failures,
                block_autoplay,
            };
            commands::simulate(&url, config, options, &cli.format).await?;
        }
        Commands::Config => {
            commands::show_config(&config, &cli.format)?;
        }
    }

    Ok(())
}
