//! wgpu backend for the planet surface: headless device setup, tile texture
//! uploads, patch mesh buffers and draw recording.

mod backend;
mod buffer;
mod gpu;
mod texture;

pub use backend::WgpuSurfaceGraphics;
pub use buffer::{PatchMeshBuffer, patch_vertex_layout};
pub use gpu::{GpuDevice, RenderInitError, init_headless_device};
pub use texture::{TileTexture, TileTextureUploader, expand_rgb_to_rgba, texture_format};
