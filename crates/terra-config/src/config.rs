//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Planet surface and LOD settings.
    pub surface: SurfaceConfig,
    /// Tile streaming worker pool settings.
    pub streaming: StreamingConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Planet surface, LOD and eviction settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Directory holding the pre-baked tile pyramid.
    pub tile_root: PathBuf,
    /// Depth of the quadtree; level 1 is a whole cube face.
    pub max_levels: u8,
    /// Reference radius in meters used for placement and distance tests.
    pub sea_level: f64,
    /// A node splits when `scale * sea_level * lod_split_factor` exceeds the
    /// camera distance.
    pub lod_split_factor: f64,
    /// Frames a resident texture may go unused before it is evicted.
    pub eviction_ticks: u32,
    /// Deepest level that owns its own tile textures. Deeper nodes sample a
    /// sub-rectangle of their ancestor at this level.
    pub texture_levels: u8,
}

/// Tile streaming worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamingConfig {
    /// Number of decode worker threads. 0 picks a value from the CPU count.
    pub worker_threads: usize,
    /// Maximum loads queued or decoding at once. Further requests are
    /// rejected and retried on a later frame.
    pub max_in_flight: usize,
    /// Capacity of the ready queue between workers and the binder.
    pub result_capacity: usize,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info,terra_surface=trace").
    pub log_level: String,
    /// Directory for JSON log files in debug builds.
    pub log_dir: Option<PathBuf>,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            tile_root: PathBuf::from("tiles"),
            max_levels: 6,
            sea_level: 6_371_000.0,
            lod_split_factor: 1.5,
            eviction_ticks: 100,
            texture_levels: 4,
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            max_in_flight: 64,
            result_capacity: 128,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

/// Platform config directory (`$XDG_CONFIG_HOME/terra` and equivalents),
/// falling back to `./config`.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("terra"))
        .unwrap_or_else(|| PathBuf::from("config"))
}

/// File name of the persisted config inside a config directory.
const CONFIG_FILE: &str = "config.ron";

impl Config {
    /// Read `config.ron` from `config_dir`. A missing file is replaced by
    /// the defaults, which are written back so they can be edited.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE);
        if !path.exists() {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Wrote default surface config to {}", path.display());
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = ron::from_str(&contents)
            .map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
        log::info!("Loaded surface config from {}", path.display());
        Ok(config)
    }

    /// Write this config to `config_dir/config.ron`, creating the directory.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::Write {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let pretty = ron::ser::PrettyConfig::new().depth_limit(3);
        let text = ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;

        let path = config_dir.join(CONFIG_FILE);
        std::fs::write(&path, text).map_err(|source| ConfigError::Write { path, source })
    }
}
