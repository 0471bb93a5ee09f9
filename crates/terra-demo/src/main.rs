//! Demo binary that flies a camera down to the planet surface and back,
//! streaming tile textures on the way.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p terra-demo -- --tile-root /path/to/tiles`.
//! Add `--gpu` to upload textures through a wgpu device.

mod descent;

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use glam::DMat4;
use terra_config::{CliArgs, Config, default_config_dir};
use terra_render::{WgpuSurfaceGraphics, init_headless_device};
use terra_surface::{
    FrameStats, HeadlessGraphics, PatchMeshSet, PlanetSurface, PngDecoder, SurfaceError,
    SurfaceGraphics,
};
use tracing::{error, info, warn};

use crate::descent::DescentPath;

/// Frame pacing of the simulated render loop.
const FRAME_TIME: Duration = Duration::from_millis(16);

fn main() {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config
        .debug
        .log_dir
        .clone()
        .unwrap_or_else(|| config_dir.join("logs"));
    terra_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    info!(
        "Terra demo: tile root {}, depth {}, {} frames",
        config.surface.tile_root.display(),
        config.surface.max_levels,
        args.frames
    );

    let result = if args.gpu {
        match init_headless_device() {
            Ok(gpu) => match WgpuSurfaceGraphics::new(gpu) {
                Ok(mut gfx) => run(&config, args.frames, &mut gfx, |gfx| {
                    gfx.take_draws();
                }),
                Err(e) => {
                    error!("Failed to prepare GPU backend: {e}");
                    std::process::exit(1);
                }
            },
            Err(e) => {
                warn!("GPU unavailable ({e}), falling back to headless backend");
                run_headless(&config, args.frames)
            }
        }
    } else {
        run_headless(&config, args.frames)
    };

    if let Err(e) = result {
        error!("Planet surface failed: {e}");
        std::process::exit(1);
    }
}

fn run_headless(config: &Config, frames: u32) -> Result<FrameStats, SurfaceError> {
    let mut gfx = HeadlessGraphics::new();
    let stats = run(config, frames, &mut gfx, HeadlessGraphics::begin_frame)?;
    info!(
        "Headless backend: {} textures live, {} KiB uploaded",
        gfx.live_texture_count(),
        gfx.uploaded_bytes() / 1024
    );
    Ok(stats)
}

/// Drive the surface along the demo path for `frames` frames.
///
/// `end_frame` runs after every frame to consume the draws the backend
/// collected.
fn run<G, F>(
    config: &Config,
    frames: u32,
    gfx: &mut G,
    mut end_frame: F,
) -> Result<FrameStats, SurfaceError>
where
    G: SurfaceGraphics,
    F: FnMut(&mut G),
{
    let meshes = PatchMeshSet::upload_default(gfx)?;
    let mut surface = PlanetSurface::build(
        &config.surface,
        &config.streaming,
        Arc::new(PngDecoder),
        meshes,
        gfx,
    )?;

    let path = DescentPath::demo(config.surface.sea_level);
    let planet = DMat4::IDENTITY;
    let frames = frames.max(1);
    let mut totals = FrameStats::default();
    let start = Instant::now();

    for frame in 0..frames {
        let frame_start = Instant::now();
        let t = frame as f64 / frames as f64;
        let stats = surface.render(gfx, path.position(t), &planet);
        end_frame(gfx);

        totals.bound += stats.bound;
        totals.bind_failures += stats.bind_failures;
        totals.loads_requested += stats.loads_requested;
        totals.loads_deferred += stats.loads_deferred;
        totals.evicted += stats.evicted;
        totals.frame = stats.frame;
        totals.resident = stats.resident;

        if stats.frame % 60 == 0 {
            info!(
                "frame {}: altitude {:.2}, {} leaves ({} own, {} ancestor, {} fallback, {} placeholder), {} resident, {} in flight",
                stats.frame,
                path.altitude(t),
                stats.leaves_drawn,
                stats.own_draws,
                stats.ancestor_draws,
                stats.fallback_draws,
                stats.placeholder_draws,
                stats.resident,
                surface.streamer().in_flight_count()
            );
        }

        if let Some(rest) = FRAME_TIME.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    info!(
        "Finished {} frames in {:.1?}: {} tiles bound, {} failed, {} requested, {} deferred, {} evicted",
        totals.frame,
        start.elapsed(),
        totals.bound,
        totals.bind_failures,
        totals.loads_requested,
        totals.loads_deferred,
        totals.evicted
    );

    surface.release(gfx);
    Ok(totals)
}
