//! The graphics boundary: texture and mesh handles, per-patch draw data, and
//! the [`SurfaceGraphics`] trait implemented by rendering backends.
//!
//! All calls happen on the thread that owns the graphics context. The
//! [`HeadlessGraphics`] backend keeps bookkeeping only and is used when no
//! GPU is available.

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use terra_cubesphere::TileAddress;

use crate::decode::DecodedImage;
use crate::error::GraphicsError;
use crate::mesh::PatchMesh;

/// Opaque handle to a backend texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u32);

/// Opaque handle to an uploaded patch mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(pub u32);

/// The albedo and elevation textures of one tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TexturePair {
    /// RGB surface color.
    pub albedo: TextureHandle,
    /// Single-channel height.
    pub elevation: TextureHandle,
}

/// Where the textures of a leaf draw came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureSource {
    /// The leaf's own tile textures.
    Own,
    /// A sub-rectangle of the textured ancestor's tile.
    Ancestor,
    /// A sub-rectangle of the face root, while the real tile streams in.
    Fallback,
    /// Nothing resident anywhere in the chain.
    Placeholder,
}

/// Per-draw uniform block.
///
/// In the patch shader a grid vertex `v` in `[-1, 1]²` becomes
/// `p = vec3(patch.xy + patch.z * v, 1)`, is projected onto the unit sphere,
/// scaled by `patch.w` (sea level) plus sampled elevation, and finally
/// transformed by `face_to_view`. `face_to_view` is camera-relative so it
/// stays precise in `f32`. Texture coordinates are `tex.xy + tex.z * uv`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PatchUniforms {
    /// Planet transform times face base rotation, translated by `-camera`.
    pub face_to_view: [[f32; 4]; 4],
    /// `(translation.x, translation.y, scale, sea_level)`.
    pub patch: [f32; 4],
    /// `(shift.x, shift.y, scale, level)`.
    pub tex: [f32; 4],
}

/// Everything a backend needs to draw one leaf patch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PatchDraw {
    /// Tile the patch covers.
    pub address: TileAddress,
    /// Grid mesh chosen for the leaf's level.
    pub mesh: MeshHandle,
    /// Textures to bind; `None` draws untextured.
    pub textures: Option<TexturePair>,
    /// Where `textures` came from.
    pub source: TextureSource,
    /// Uniform block for the draw.
    pub uniforms: PatchUniforms,
}

/// A graphics context able to hold surface textures and draw patches.
pub trait SurfaceGraphics {
    /// Upload a decoded image into a new texture.
    fn create_texture(
        &mut self,
        label: &str,
        image: &DecodedImage,
    ) -> Result<TextureHandle, GraphicsError>;

    /// Release a texture. Each handle is deleted at most once.
    fn delete_texture(&mut self, texture: TextureHandle);

    /// Upload a patch grid mesh.
    fn create_patch_mesh(&mut self, label: &str, mesh: &PatchMesh)
    -> Result<MeshHandle, GraphicsError>;

    /// Issue the draw for one leaf.
    fn draw_patch(&mut self, draw: &PatchDraw);
}

/// Metadata the headless backend keeps per live texture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeadlessTexture {
    /// Label passed at creation.
    pub label: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Channel count.
    pub channels: u8,
}

/// Bookkeeping-only backend: allocates handles, validates uploads, tracks
/// live textures and records the draws issued since [`begin_frame`].
///
/// [`begin_frame`]: HeadlessGraphics::begin_frame
#[derive(Debug, Default)]
pub struct HeadlessGraphics {
    next_handle: u32,
    textures: HashMap<TextureHandle, HeadlessTexture>,
    meshes: HashMap<MeshHandle, usize>,
    deleted: Vec<TextureHandle>,
    invalid_deletes: usize,
    uploaded_bytes: u64,
    draws: Vec<PatchDraw>,
    fail_uploads: bool,
}

impl HeadlessGraphics {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the draws recorded so far.
    pub fn begin_frame(&mut self) {
        self.draws.clear();
    }

    /// Draws recorded since the last [`begin_frame`](Self::begin_frame).
    pub fn draws(&self) -> &[PatchDraw] {
        &self.draws
    }

    /// Make every following texture upload fail.
    pub fn set_fail_uploads(&mut self, fail: bool) {
        self.fail_uploads = fail;
    }

    /// Number of textures currently alive.
    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Whether `texture` is alive.
    pub fn is_live(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture)
    }

    /// Metadata of a live texture.
    pub fn texture(&self, texture: TextureHandle) -> Option<&HeadlessTexture> {
        self.textures.get(&texture)
    }

    /// Every successfully deleted handle, in deletion order.
    pub fn deleted_textures(&self) -> &[TextureHandle] {
        &self.deleted
    }

    /// Deletes of handles that were not alive (double frees or foreign handles).
    pub fn invalid_delete_count(&self) -> usize {
        self.invalid_deletes
    }

    /// Total pixel bytes uploaded so far.
    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes
    }

    /// Index count of an uploaded mesh.
    pub fn mesh_index_count(&self, mesh: MeshHandle) -> Option<usize> {
        self.meshes.get(&mesh).copied()
    }

    fn allocate(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }
}

impl SurfaceGraphics for HeadlessGraphics {
    fn create_texture(
        &mut self,
        label: &str,
        image: &DecodedImage,
    ) -> Result<TextureHandle, GraphicsError> {
        if self.fail_uploads {
            return Err(GraphicsError::Backend(format!("upload of '{label}' refused")));
        }
        image.validate()?;
        let handle = TextureHandle(self.allocate());
        self.uploaded_bytes += image.bytes.len() as u64;
        self.textures.insert(
            handle,
            HeadlessTexture {
                label: label.to_string(),
                width: image.width,
                height: image.height,
                channels: image.channels,
            },
        );
        Ok(handle)
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture).is_some() {
            self.deleted.push(texture);
        } else {
            self.invalid_deletes += 1;
        }
    }

    fn create_patch_mesh(
        &mut self,
        _label: &str,
        mesh: &PatchMesh,
    ) -> Result<MeshHandle, GraphicsError> {
        let handle = MeshHandle(self.allocate());
        self.meshes.insert(handle, mesh.indices.len());
        Ok(handle)
    }

    fn draw_patch(&mut self, draw: &PatchDraw) {
        self.draws.push(*draw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_block_is_std140_sized() {
        assert_eq!(std::mem::size_of::<PatchUniforms>(), 96);
        let zero = PatchUniforms::zeroed();
        assert_eq!(bytemuck::bytes_of(&zero).len(), 96);
    }

    #[test]
    fn test_headless_tracks_texture_lifetime() {
        let mut gfx = HeadlessGraphics::new();
        let img = DecodedImage::filled(2, 2, &[1, 2, 3]);
        let a = gfx.create_texture("a", &img).unwrap();
        let b = gfx.create_texture("b", &img).unwrap();
        assert_ne!(a, b);
        assert_eq!(gfx.live_texture_count(), 2);
        assert_eq!(gfx.uploaded_bytes(), 24);

        gfx.delete_texture(a);
        assert!(!gfx.is_live(a));
        assert!(gfx.is_live(b));
        assert_eq!(gfx.deleted_textures(), &[a]);

        gfx.delete_texture(a);
        assert_eq!(gfx.invalid_delete_count(), 1);
    }

    #[test]
    fn test_headless_rejects_invalid_upload() {
        let mut gfx = HeadlessGraphics::new();
        let bad = DecodedImage::new(2, 2, 3, vec![0; 5]);
        assert!(gfx.create_texture("bad", &bad).is_err());
        assert_eq!(gfx.live_texture_count(), 0);
    }

    #[test]
    fn test_headless_fail_uploads_switch() {
        let mut gfx = HeadlessGraphics::new();
        gfx.set_fail_uploads(true);
        let img = DecodedImage::filled(1, 1, &[0]);
        assert!(matches!(
            gfx.create_texture("x", &img),
            Err(GraphicsError::Backend(_))
        ));
    }
}
