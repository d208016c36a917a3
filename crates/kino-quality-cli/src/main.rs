//! Kino Quality CLI - Headless adaptive quality toolkit
//!
//! Features:
//! - Device profiling and quality menus
//! - Connection-hint recommendations
//! - HLS quality ladder inspection
//! - Scenario replay through the real controller (`simulate` feature, on by
//!   default; it links tokio's test-util to pause the clock)

use clap::{Args, Parser, Subcommand};
use kino_quality::DeviceSignals;
#[cfg(feature = "simulate")]
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;
#[cfg(feature = "simulate")]
mod scenario;

/// Kino Quality - Adaptive quality toolkit
#[derive(Parser)]
#[command(name = "kino-quality")]
#[command(author = "Purple Squirrel Media")]
#[command(version)]
#[command(about = "Adaptive video quality profiling and simulation", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

/// Device hints shared by several commands
#[derive(Args)]
struct DeviceArgs {
    /// Screen width in CSS pixels
    #[arg(long)]
    width: Option<u32>,

    /// Screen height in CSS pixels
    #[arg(long)]
    height: Option<u32>,

    /// Device pixel ratio
    #[arg(long)]
    pixel_ratio: Option<f32>,

    /// Treat the device as mobile
    #[arg(long)]
    mobile: bool,

    /// User agent to sniff when --mobile is not given
    #[arg(long)]
    user_agent: Option<String>,

    /// Logical CPU cores
    #[arg(long)]
    cores: Option<u32>,

    /// Device memory in GB
    #[arg(long)]
    memory: Option<f32>,
}

impl From<DeviceArgs> for DeviceSignals {
    fn from(args: DeviceArgs) -> Self {
        DeviceSignals {
            screen_width: args.width,
            screen_height: args.height,
            pixel_ratio: args.pixel_ratio,
            is_mobile: args.mobile.then_some(true),
            user_agent: args.user_agent,
            hardware_concurrency: args.cores,
            device_memory_gb: args.memory,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show the quality cap and menu for a device
    Profile {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Recommend a quality for a connection
    Recommend {
        /// Effective connection type (slow-2g, 2g, 3g, 4g)
        #[arg(short, long, default_value = "4g")]
        effective_type: String,

        /// Downlink estimate in Mbps
        #[arg(short, long, default_value = "10")]
        downlink: f32,

        /// Data saver enabled
        #[arg(long)]
        data_saver: bool,

        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Show the quality ladder of an HLS master playlist
    Ladder {
        /// URL or path to the master playlist
        master: String,
    },

    /// Replay a playback scenario through the controller
    #[cfg(feature = "simulate")]
    Simulate {
        /// Scenario JSON file
        scenario: PathBuf,

        /// Controller configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    kino_quality::init();

    match cli.command {
        Commands::Profile { device } => {
            commands::profile(&device.into(), &cli.format)?;
        }
        Commands::Recommend { effective_type, downlink, data_saver, device } => {
            commands::recommend(&effective_type, downlink, data_saver, &device.into(), &cli.format)?;
        }
        Commands::Ladder { master } => {
            commands::ladder(&master, &cli.format).await?;
        }
        #[cfg(feature = "simulate")]
        Commands::Simulate { scenario, config } => {
            commands::simulate(&scenario, config, &cli.format).await?;
        }
    }

    Ok(())
}
