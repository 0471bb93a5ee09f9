//! Level-of-detail planet surface: a quadtree per cube face whose nodes split
//! with camera distance, with tile textures streamed from a pre-baked pyramid
//! on disk by a pool of decode workers and evicted again when unused.

mod binder;
mod builder;
mod decode;
mod error;
mod evictor;
mod graphics;
mod mesh;
mod node;
mod renderer;
mod streaming;
mod surface;

pub use binder::{BindReport, bind_ready_tiles};
pub use builder::TreeBuilder;
pub use decode::{DecodedImage, ImageDecoder, PngDecoder};
pub use error::{GraphicsError, SurfaceError};
pub use evictor::Evictor;
pub use graphics::{
    HeadlessGraphics, HeadlessTexture, MeshHandle, PatchDraw, PatchUniforms, SurfaceGraphics,
    TextureHandle, TexturePair, TextureSource,
};
pub use mesh::{PatchMesh, PatchMeshSet, PatchVertex};
pub use node::{NodeId, StreamState, SurfaceNode, SurfaceTree};
pub use renderer::{FrameStats, LodSelector};
pub use streaming::{LoadRequest, LoadedTile, TileImages, TileStreamer, load_tile_sync, upload_tile};
pub use surface::PlanetSurface;
