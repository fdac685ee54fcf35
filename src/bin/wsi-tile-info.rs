//! Demonstration CLI: opens a slide, prints its pyramid and channel
//! metadata, and optionally reads one region to exercise the full
//! prepare/execute/finalize pipeline end to end.
//!
//! Not part of the library surface — this binary exists to make the core
//! crate runnable standalone the way the teacher's `main.rs` made its
//! server runnable, scaled down to what a tile-read-only core needs.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_tile_core::config::RuntimeConfig;
use wsi_tile_core::slide::global_registry;
use wsi_tile_core::{ImageCoordinate, ImageDimensions, RegionSpec, TileRequest};

#[derive(Parser, Debug)]
#[command(name = "wsi-tile-info")]
#[command(about = "Open a whole-slide image and print its pyramid metadata", long_about = None)]
struct Cli {
    /// Path to an .svs, .mrxs, or .qptiff file.
    slide: PathBuf,

    /// Also read a region at this level and report its output dimensions.
    #[arg(long)]
    level: Option<u32>,

    #[arg(long, default_value_t = 0)]
    x: u32,
    #[arg(long, default_value_t = 0)]
    y: u32,
    #[arg(long, default_value_t = 512)]
    width: u32,
    #[arg(long, default_value_t = 512)]
    height: u32,

    #[command(flatten)]
    runtime: RuntimeConfig,

    /// Enable debug-level tracing.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = cli.runtime.validate() {
        error!("invalid runtime configuration: {e}");
        return ExitCode::FAILURE;
    }
    cli.runtime.apply_thread_count();

    let reader = match global_registry().create_reader(&cli.slide, None) {
        Ok(reader) => reader,
        Err(e) => {
            error!("failed to open {}: {e}", cli.slide.display());
            return ExitCode::FAILURE;
        }
    };

    info!("format: {}", reader.format_name());
    info!("levels: {}", reader.level_count());
    for level in 0..reader.level_count() {
        if let Some(info) = reader.level_info(level) {
            println!(
                "  level {level}: {}x{} (downsample {:.2}x, tile {}x{})",
                info.dimensions.width, info.dimensions.height, info.downsample, info.tile_size.width, info.tile_size.height
            );
        }
    }

    let channels = reader.channel_metadata();
    if !channels.is_empty() {
        println!("channels:");
        for channel in channels {
            println!("  {} ({}) - {:?}", channel.name, channel.biomarker, channel.color);
        }
    }

    if let Some(level) = cli.level {
        let request = TileRequest::new(RegionSpec {
            top_left: ImageCoordinate::new(cli.x, cli.y),
            size: ImageDimensions::new(cli.width, cli.height),
            level,
        });
        match reader.read_region(&request) {
            Ok(image) => {
                println!(
                    "read_region: {}x{}, {} channel(s), {} bytes",
                    image.dimensions.width,
                    image.dimensions.height,
                    image.channels,
                    image.bytes.len()
                );
            }
            Err(e) => {
                error!("read_region failed: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "wsi_tile_core=debug" } else { "wsi_tile_core=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
