//! Pre-tessellated patch grids and the level → mesh selection table.

use bytemuck::{Pod, Zeroable};

use crate::error::GraphicsError;
use crate::graphics::{MeshHandle, SurfaceGraphics};

/// One vertex of a patch grid.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PatchVertex {
    /// Position in the patch plane, `[-1, 1]²`.
    pub position: [f32; 2],
    /// Texture coordinate, `[0, 1]²`.
    pub uv: [f32; 2],
}

/// A square grid of `resolution × resolution` quads shared by every patch.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchMesh {
    /// Quads per side.
    pub resolution: u32,
    /// `(resolution + 1)²` vertices, row-major.
    pub vertices: Vec<PatchVertex>,
    /// Two counter-clockwise triangles per quad.
    pub indices: Vec<u32>,
}

impl PatchMesh {
    /// Build a grid with `resolution` quads per side.
    ///
    /// # Panics
    ///
    /// Panics if `resolution` is zero.
    #[must_use]
    pub fn grid(resolution: u32) -> Self {
        assert!(resolution > 0, "patch resolution must be positive");
        let side = resolution + 1;
        let step = 1.0 / resolution as f32;

        let mut vertices = Vec::with_capacity((side * side) as usize);
        for j in 0..side {
            for i in 0..side {
                let u = i as f32 * step;
                let v = j as f32 * step;
                vertices.push(PatchVertex {
                    position: [u * 2.0 - 1.0, v * 2.0 - 1.0],
                    uv: [u, v],
                });
            }
        }

        let mut indices = Vec::with_capacity((resolution * resolution * 6) as usize);
        for j in 0..resolution {
            for i in 0..resolution {
                let a = j * side + i;
                let b = a + 1;
                let c = a + side;
                let d = c + 1;
                indices.extend_from_slice(&[a, b, d, a, d, c]);
            }
        }

        Self {
            resolution,
            vertices,
            indices,
        }
    }

    /// Vertex data as raw bytes for buffer upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Index data as raw bytes for buffer upload.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Maps tree levels to patch meshes: coarse grids for shallow levels, finer
/// grids deeper down where elevation detail matters.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchMeshSet {
    /// `(deepest level, mesh)`, sorted by level.
    tiers: Vec<(u8, MeshHandle)>,
}

impl PatchMeshSet {
    /// Default `(deepest level, resolution)` tiers used by [`upload_default`](Self::upload_default).
    pub const DEFAULT_TIERS: [(u8, u32); 3] = [(2, 16), (4, 32), (u8::MAX, 64)];

    /// Build a set from `(deepest level, mesh)` tiers. Levels deeper than
    /// every tier use the last one.
    ///
    /// # Panics
    ///
    /// Panics if `tiers` is empty.
    #[must_use]
    pub fn new(mut tiers: Vec<(u8, MeshHandle)>) -> Self {
        assert!(!tiers.is_empty(), "need at least one patch mesh");
        tiers.sort_by_key(|&(level, _)| level);
        Self { tiers }
    }

    /// Use a single mesh for every level.
    #[must_use]
    pub fn single(mesh: MeshHandle) -> Self {
        Self::new(vec![(u8::MAX, mesh)])
    }

    /// Tessellate and upload [`DEFAULT_TIERS`](Self::DEFAULT_TIERS).
    pub fn upload_default<G: SurfaceGraphics>(gfx: &mut G) -> Result<Self, GraphicsError> {
        let mut tiers = Vec::with_capacity(Self::DEFAULT_TIERS.len());
        for (level, resolution) in Self::DEFAULT_TIERS {
            let mesh = PatchMesh::grid(resolution);
            let handle = gfx.create_patch_mesh(&format!("patch-{resolution}"), &mesh)?;
            tiers.push((level, handle));
        }
        Ok(Self::new(tiers))
    }

    /// Mesh used for a leaf at `level`.
    #[must_use]
    pub fn select(&self, level: u8) -> MeshHandle {
        self.tiers
            .iter()
            .find(|&&(deepest, _)| level <= deepest)
            .or_else(|| self.tiers.last())
            .map(|&(_, mesh)| mesh)
            .unwrap_or(MeshHandle(0))
    }
}
