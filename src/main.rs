// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand, ValueEnum};
use dualcam::media::encoders::VideoCodec;
use dualcam::pipelines::dual::{CameraFacing, PipPosition, PipSize};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "dualcam")]
#[command(about = "Record two cameras into one picture-in-picture video")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras and microphones
    List,

    /// List installed video and audio encoders
    Encoders,

    /// Record a picture-in-picture video
    Record(cli::RecordArgs),

    /// Write the default settings file
    InitConfig {
        /// Settings file (default: ~/.config/dualcam/settings.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Inset corner on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PositionArg {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl From<PositionArg> for PipPosition {
    fn from(arg: PositionArg) -> Self {
        match arg {
            PositionArg::TopLeft => PipPosition::TopLeft,
            PositionArg::TopRight => PipPosition::TopRight,
            PositionArg::BottomLeft => PipPosition::BottomLeft,
            PositionArg::BottomRight => PipPosition::BottomRight,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SizeArg {
    Small,
    Medium,
    Large,
}

impl From<SizeArg> for PipSize {
    fn from(arg: SizeArg) -> Self {
        match arg {
            SizeArg::Small => PipSize::Small,
            SizeArg::Medium => PipSize::Medium,
            SizeArg::Large => PipSize::Large,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CodecArg {
    H264,
    Hevc,
}

impl From<CodecArg> for VideoCodec {
    fn from(arg: CodecArg) -> Self {
        match arg {
            CodecArg::H264 => VideoCodec::H264,
            CodecArg::Hevc => VideoCodec::HEVC,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FacingArg {
    Back,
    Front,
}

impl From<FacingArg> for CameraFacing {
    fn from(arg: FacingArg) -> Self {
        match arg {
            FacingArg::Back => CameraFacing::Back,
            FacingArg::Front => CameraFacing::Front,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=dualcam=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => cli::list_devices(),
        Commands::Encoders => cli::list_encoders(),
        Commands::Record(args) => cli::record(args),
        Commands::InitConfig { config } => cli::init_config(config),
    }
}
