// SPDX-License-Identifier: GPL-3.0-only

use barcode_scanner::app::format_picker::DisplayConstraints;
use barcode_scanner::backends::camera::types::{LensFacing, Resolution, SensorRotation};
use barcode_scanner::constants::DETECTOR_MAX_DIMENSION;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

mod cli;

#[derive(Parser)]
#[command(name = "barcode-scanner")]
#[command(about = "Scan barcodes from a camera feed")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Facing {
    Back,
    Front,
    External,
}

impl From<Facing> for LensFacing {
    fn from(facing: Facing) -> Self {
        match facing {
            Facing::Back => LensFacing::Back,
            Facing::Front => LensFacing::Front,
            Facing::External => LensFacing::External,
        }
    }
}

/// Parse a rotation in degrees, rejecting anything but quarter turns
fn parse_rotation(value: &str) -> Result<SensorRotation, String> {
    let degrees: i32 = value
        .trim()
        .parse()
        .map_err(|_| format!("`{}` is not a number of degrees", value))?;
    if degrees % 90 != 0 {
        return Err(format!("rotation must be a multiple of 90, got {}", degrees));
    }
    Ok(SensorRotation::from_degrees_int(degrees))
}

#[derive(Subcommand)]
enum Commands {
    /// Replay images through the capture pipeline and print workflow events
    Scan {
        /// Image files replayed as camera frames (test pattern when omitted)
        images: Vec<PathBuf>,

        /// Configuration file (default: ~/.config/barcode-scanner/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Display size in its natural orientation
        #[arg(long, default_value = "1920x1080")]
        display: Resolution,

        /// Display rotation in degrees (multiple of 90)
        #[arg(long, default_value = "0", value_parser = parse_rotation, allow_hyphen_values = true)]
        display_rotation: SensorRotation,

        /// Sensor mounting orientation in degrees (multiple of 90)
        #[arg(long, default_value = "0", value_parser = parse_rotation, allow_hyphen_values = true)]
        sensor: SensorRotation,

        /// Camera facing
        #[arg(long, value_enum, default_value = "back")]
        facing: Facing,

        /// Show results without the searching delay
        #[arg(long)]
        no_delay: bool,

        /// Keep scanning after a barcode was found
        #[arg(long)]
        continuous: bool,

        /// Stop the virtual camera after this many frames
        #[arg(long)]
        frames: Option<u64>,

        /// Give up after this many seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },

    /// Detect barcodes in a single image
    Decode {
        image: PathBuf,

        /// Largest side of the image handed to the detector
        #[arg(long, default_value_t = DETECTOR_MAX_DIMENSION)]
        max_dimension: u32,
    },

    /// Show the preview size chosen from a list of supported sizes
    Sizes {
        /// Supported preview sizes, e.g. 1920x1080 1280x720
        #[arg(required = true)]
        sizes: Vec<Resolution>,

        /// Display size in its natural orientation
        #[arg(long, default_value = "1920x1080")]
        display: Resolution,

        /// Display rotation in degrees (multiple of 90)
        #[arg(long, default_value = "0", value_parser = parse_rotation, allow_hyphen_values = true)]
        display_rotation: SensorRotation,

        /// Sensor mounting orientation in degrees (multiple of 90)
        #[arg(long, default_value = "0", value_parser = parse_rotation, allow_hyphen_values = true)]
        sensor: SensorRotation,

        /// User selected preview size
        #[arg(long)]
        user: Option<Resolution>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=barcode_scanner=trace
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
        Commands::Scan {
            images,
            config,
            display,
            display_rotation,
            sensor,
            facing,
            no_delay,
            continuous,
            frames,
            timeout,
        } => cli::scan(cli::ScanOptions {
            images,
            config,
            display,
            display_rotation,
            sensor_orientation: sensor,
            facing: facing.into(),
            no_delay,
            continuous,
            frame_limit: frames,
            timeout: Duration::from_secs(timeout),
        }),
        Commands::Decode {
            image,
            max_dimension,
        } => cli::decode(&image, max_dimension),
        Commands::Sizes {
            sizes,
            display,
            display_rotation,
            sensor,
            user,
        } => cli::sizes(
            &sizes,
            DisplayConstraints {
                size: display,
                rotation: display_rotation,
            },
            sensor,
            user,
        ),
    }
}
