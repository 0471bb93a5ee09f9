//! One-time construction of the six face quadtrees and their root textures.

use std::path::Path;

use glam::DVec2;
use terra_cubesphere::{CubeFace, TileAddress, quadrant_offset};
use tracing::{info, warn};

use crate::decode::ImageDecoder;
use crate::error::SurfaceError;
use crate::graphics::SurfaceGraphics;
use crate::node::{NodeId, StreamState, SurfaceNode, SurfaceTree};
use crate::streaming::{load_tile_sync, upload_tile};

/// Builds the complete quadtree down to a fixed depth.
#[derive(Clone, Copy, Debug)]
pub struct TreeBuilder {
    max_levels: u8,
    texture_levels: u8,
}

impl TreeBuilder {
    /// Deepest tree the builder accepts. Every node is allocated up front, so
    /// this caps the arena at `6 * (4^12 - 1) / 3`, about 33.5M nodes.
    pub const MAX_BUILD_LEVELS: u8 = 12;

    /// Create a builder for trees `max_levels` deep whose nodes own textures
    /// down to `texture_levels`.
    pub fn new(max_levels: u8, texture_levels: u8) -> Result<Self, SurfaceError> {
        if max_levels == 0 || max_levels > Self::MAX_BUILD_LEVELS {
            return Err(SurfaceError::InvalidDepth {
                max_levels,
                limit: Self::MAX_BUILD_LEVELS,
            });
        }
        Ok(Self {
            max_levels,
            texture_levels: texture_levels.max(1),
        })
    }

    /// Configured depth.
    pub fn max_levels(&self) -> u8 {
        self.max_levels
    }

    /// Node count of one face tree: `(4^L - 1) / 3`, or `None` if it does not
    /// fit in `usize`.
    #[must_use]
    pub fn nodes_per_face(max_levels: u8) -> Option<usize> {
        4usize
            .checked_pow(u32::from(max_levels))
            .map(|leaves| (leaves - 1) / 3)
    }

    /// Allocate all six face trees. No textures are touched.
    #[must_use]
    pub fn build(&self) -> SurfaceTree {
        let capacity = Self::nodes_per_face(self.max_levels).map_or(0, |n| 6 * n);
        let mut nodes = Vec::with_capacity(capacity);
        let mut roots = [NodeId(0); 6];

        for face in CubeFace::ALL {
            let id = NodeId(nodes.len() as u32);
            nodes.push(root_node(face, id));
            roots[face.index()] = id;
            self.build_children(&mut nodes, id);
        }

        SurfaceTree { nodes, roots }
    }

    fn build_children(&self, nodes: &mut Vec<SurfaceNode>, parent: NodeId) {
        if nodes[parent.index()].level() >= self.max_levels {
            return;
        }

        let mut children = [NodeId(0); 4];
        for (quadrant, slot) in children.iter_mut().enumerate() {
            let id = NodeId(nodes.len() as u32);
            let child = self.child_node(&nodes[parent.index()], parent, quadrant, id);
            nodes.push(child);
            *slot = id;
        }
        nodes[parent.index()].children = Some(children);

        for child in children {
            self.build_children(nodes, child);
        }
    }

    /// Derive quadrant `quadrant` of `parent`. `id` is the slot the child
    /// will occupy.
    fn child_node(
        &self,
        parent: &SurfaceNode,
        parent_id: NodeId,
        quadrant: usize,
        id: NodeId,
    ) -> SurfaceNode {
        let (dx, dy) = quadrant_offset(quadrant);
        let offset = DVec2::new(dx as f64, dy as f64);
        let sign = offset * 2.0 - DVec2::ONE;

        let scale = parent.scale * 0.5;
        let tex_scale_lod = parent.tex_scale_lod * 0.5;
        let address = parent.address.child(quadrant);

        // Shallow nodes own a whole texture; deeper ones sample a
        // sub-rectangle of their ancestor at `texture_levels`.
        let (textured_ancestor, tex_shift, tex_scale) = if address.level <= self.texture_levels {
            (id, DVec2::ZERO, 1.0)
        } else {
            let tex_scale = parent.tex_scale * 0.5;
            (
                parent.textured_ancestor,
                parent.tex_shift + offset * tex_scale,
                tex_scale,
            )
        };

        SurfaceNode {
            address,
            scale,
            patch_translation: parent.patch_translation + sign * scale,
            base_rotation: parent.base_rotation,
            tex_shift,
            tex_scale,
            tex_shift_lod: parent.tex_shift_lod + offset * tex_scale_lod,
            tex_scale_lod,
            parent: Some(parent_id),
            children: None,
            textured_ancestor,
            state: StreamState::Unrequested,
            textures: None,
            fallback: None,
            pending: None,
            ticks_since_last_use: 0,
            touched: false,
            pinned: false,
        }
    }

    /// Decode and upload the six root tiles synchronously, pin them, and hand
    /// their textures to every node of the face as the fallback.
    ///
    /// A root that fails to load is marked [`StreamState::Failed`] and its
    /// face renders placeholders until the surface is rebuilt. Returns the
    /// number of roots that loaded.
    pub fn load_roots<G: SurfaceGraphics>(
        tree: &mut SurfaceTree,
        decoder: &dyn ImageDecoder,
        tile_root: &Path,
        gfx: &mut G,
    ) -> usize {
        let mut loaded = 0;
        for face in CubeFace::ALL {
            let id = tree.root(face);
            let address = tree[id].address;
            let result = load_tile_sync(decoder, tile_root, &address)
                .and_then(|images| upload_tile(gfx, &address, &images));

            let root = &mut tree[id];
            root.pinned = true;
            match result {
                Ok(textures) => {
                    root.textures = Some(textures);
                    root.state = StreamState::Bound;
                    loaded += 1;
                }
                Err(err) => {
                    warn!(%address, error = %err, "root tile unavailable; face will draw placeholders");
                    root.state = StreamState::Failed;
                }
            }

            let fallback = tree[id].textures;
            for node in tree.post_order(id) {
                tree[node].fallback = fallback;
            }
        }
        info!(loaded, "root tiles loaded");
        loaded
    }
}

fn root_node(face: CubeFace, id: NodeId) -> SurfaceNode {
    SurfaceNode {
        address: TileAddress::root(face),
        scale: 1.0,
        patch_translation: DVec2::ZERO,
        base_rotation: face.base_rotation(),
        tex_shift: DVec2::ZERO,
        tex_scale: 1.0,
        tex_shift_lod: DVec2::ZERO,
        tex_scale_lod: 1.0,
        parent: None,
        children: None,
        textured_ancestor: id,
        state: StreamState::Unrequested,
        textures: None,
        fallback: None,
        pending: None,
        ticks_since_last_use: 0,
        touched: false,
        pinned: false,
    }
}
