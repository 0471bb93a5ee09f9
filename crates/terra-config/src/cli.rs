//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Terra command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug)]
#[command(name = "terra", about = "Streaming planet surface renderer")]
pub struct CliArgs {
    /// Directory holding the tile pyramid.
    #[arg(long)]
    pub tile_root: Option<PathBuf>,

    /// Quadtree depth (level 1 = whole face).
    #[arg(long)]
    pub max_levels: Option<u8>,

    /// Planet reference radius in meters.
    #[arg(long)]
    pub sea_level: Option<f64>,

    /// Number of tile decode workers (0 = automatic).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of frames to simulate.
    #[arg(long, default_value_t = 600)]
    pub frames: u32,

    /// Upload textures through a wgpu device instead of the headless backend.
    #[arg(long)]
    pub gpu: bool,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref root) = args.tile_root {
            self.surface.tile_root = root.clone();
        }
        if let Some(levels) = args.max_levels {
            self.surface.max_levels = levels;
        }
        if let Some(sea_level) = args.sea_level {
            self.surface.sea_level = sea_level;
        }
        if let Some(workers) = args.workers {
            self.streaming.worker_threads = workers;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
