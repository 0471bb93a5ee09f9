//! Error types for the surface engine and its graphics boundary.

use std::path::PathBuf;

/// Errors produced while building, streaming or binding the planet surface.
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    /// The requested quadtree depth cannot be built.
    #[error("invalid quadtree depth {max_levels} (expected 1..={limit})")]
    InvalidDepth {
        /// Depth that was requested.
        max_levels: u8,
        /// Deepest supported tree.
        limit: u8,
    },

    /// A tile file is absent or could not be decoded.
    #[error("tile resource {} missing or undecodable: {source}", path.display())]
    ResourceMissing {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying IO or decode failure.
        #[source]
        source: image::ImageError,
    },

    /// The graphics backend rejected an upload.
    #[error(transparent)]
    Graphics(#[from] GraphicsError),

    /// A tile loader worker thread could not be started.
    #[error("failed to spawn tile loader thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// Errors reported by a [`SurfaceGraphics`](crate::SurfaceGraphics) backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphicsError {
    /// Width or height is zero.
    #[error("texture dimensions must be non-zero, got {width}x{height}")]
    ZeroDimensions { width: u32, height: u32 },

    /// Pixel data length doesn't match `width * height * channels`.
    #[error("texture data size ({actual}) does not match expected ({expected})")]
    DataSizeMismatch { actual: usize, expected: usize },

    /// Channel count outside 1..=4.
    #[error("unsupported channel count {0}")]
    UnsupportedChannels(u8),

    /// Backend specific failure.
    #[error("graphics backend error: {0}")]
    Backend(String),
}

impl SurfaceError {
    /// Wrap an IO error for a tile path as [`SurfaceError::ResourceMissing`].
    pub fn missing(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        SurfaceError::ResourceMissing {
            path: path.into(),
            source: image::ImageError::IoError(err),
        }
    }
}
