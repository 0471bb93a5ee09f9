//! Quadtree cells and the arena that owns them.
//!
//! Nodes are stored in a flat arena ([`SurfaceTree`]) and refer to each other
//! by [`NodeId`]. A parent owns its children through the arena; the
//! `textured_ancestor` link is a plain index into the same arena and is never
//! used to release anything. Because the arena is only ever dropped as a
//! whole, that index cannot outlive the node it names.

use std::ops::{Index, IndexMut};

use glam::{DQuat, DVec2};
use terra_cubesphere::{CubeFace, TileAddress};

use crate::graphics::TexturePair;
use crate::streaming::TileImages;

/// Index of a node in its [`SurfaceTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Position of the node in the arena.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Streaming state of a node's own tile textures.
///
/// `Unrequested → Loading → DataReady → Bound`, with `Failed` as a terminal
/// state for tiles that could not be decoded or uploaded. Eviction returns a
/// bound node to `Unrequested`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum StreamState {
    /// No load requested.
    #[default]
    Unrequested,
    /// A load request is queued or decoding.
    Loading,
    /// Decoded pixels are waiting for upload.
    DataReady,
    /// Both textures are resident on the GPU.
    Bound,
    /// The tile could not be decoded or uploaded; never retried.
    Failed,
}

/// One cell of the planet quadtree.
#[derive(Debug)]
pub struct SurfaceNode {
    pub(crate) address: TileAddress,
    pub(crate) scale: f64,
    pub(crate) patch_translation: DVec2,
    pub(crate) base_rotation: DQuat,
    pub(crate) tex_shift: DVec2,
    pub(crate) tex_scale: f64,
    pub(crate) tex_shift_lod: DVec2,
    pub(crate) tex_scale_lod: f64,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Option<[NodeId; 4]>,
    pub(crate) textured_ancestor: NodeId,
    pub(crate) state: StreamState,
    pub(crate) textures: Option<TexturePair>,
    pub(crate) fallback: Option<TexturePair>,
    pub(crate) pending: Option<TileImages>,
    pub(crate) ticks_since_last_use: u32,
    pub(crate) touched: bool,
    pub(crate) pinned: bool,
}

impl SurfaceNode {
    /// Tile address of this node.
    pub fn address(&self) -> TileAddress {
        self.address
    }

    /// Cube face of this node.
    pub fn face(&self) -> CubeFace {
        self.address.face
    }

    /// Depth of this node; roots are level 1.
    pub fn level(&self) -> u8 {
        self.address.level
    }

    /// Half-extent of the patch in face-plane units (`2^-(level-1)`).
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Centre of the patch in the face plane, `[-1, 1]²`.
    pub fn patch_translation(&self) -> DVec2 {
        self.patch_translation
    }

    /// Rotation from the patch frame onto the cube face.
    pub fn base_rotation(&self) -> DQuat {
        self.base_rotation
    }

    /// Offset into the textured ancestor's texture.
    pub fn tex_shift(&self) -> DVec2 {
        self.tex_shift
    }

    /// Fraction of the textured ancestor's texture this node covers.
    pub fn tex_scale(&self) -> f64 {
        self.tex_scale
    }

    /// Offset into the face root's texture.
    pub fn tex_shift_lod(&self) -> DVec2 {
        self.tex_shift_lod
    }

    /// Fraction of the face root's texture this node covers.
    pub fn tex_scale_lod(&self) -> f64 {
        self.tex_scale_lod
    }

    /// Parent node, `None` for roots.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// The four children, `None` for leaves of the built tree.
    pub fn children(&self) -> Option<[NodeId; 4]> {
        self.children
    }

    /// Whether the node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Nearest ancestor (or self) that owns the textures this node samples.
    pub fn textured_ancestor(&self) -> NodeId {
        self.textured_ancestor
    }

    /// Current streaming state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// A load for this node is queued or decoding.
    pub fn is_loading(&self) -> bool {
        self.state == StreamState::Loading
    }

    /// Decoded data is waiting for upload.
    pub fn is_data_ready(&self) -> bool {
        self.state == StreamState::DataReady
    }

    /// The node's own textures are resident.
    pub fn is_texture_loaded(&self) -> bool {
        self.state == StreamState::Bound
    }

    /// Own textures, when bound.
    pub fn textures(&self) -> Option<TexturePair> {
        self.textures
    }

    /// Face-root textures used while nothing better is resident.
    pub fn fallback(&self) -> Option<TexturePair> {
        self.fallback
    }

    /// Frames since the textures were last sampled.
    pub fn ticks_since_last_use(&self) -> u32 {
        self.ticks_since_last_use
    }

    /// Pinned nodes (face roots) are never evicted.
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub(crate) fn touch(&mut self) {
        self.ticks_since_last_use = 0;
        self.touched = true;
    }
}

/// Arena holding every node of the six face trees.
#[derive(Debug)]
pub struct SurfaceTree {
    pub(crate) nodes: Vec<SurfaceNode>,
    pub(crate) roots: [NodeId; 6],
}

impl SurfaceTree {
    /// Node by id.
    pub fn node(&self, id: NodeId) -> &SurfaceNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut SurfaceNode {
        &mut self.nodes[id.index()]
    }

    /// Root node of a face.
    pub fn root(&self, face: CubeFace) -> NodeId {
        self.roots[face.index()]
    }

    /// The six roots in face order.
    pub fn roots(&self) -> [NodeId; 6] {
        self.roots
    }

    /// Total number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &SurfaceNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId(i as u32), node))
    }

    /// Locate the node for a tile address by descending from its face root.
    pub fn find(&self, address: &TileAddress) -> Option<NodeId> {
        let mut id = self.root(address.face);
        for level in 2..=address.level {
            let shift = address.level - level;
            let dx = (address.x >> shift) & 1;
            let dy = (address.y >> shift) & 1;
            let children = self.node(id).children?;
            id = children[(dx | (dy << 1)) as usize];
        }
        (self.node(id).address == *address).then_some(id)
    }

    /// Nodes of the subtree under `root`, children before their parent.
    pub fn post_order(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_post_order(root, &mut out);
        out
    }

    fn collect_post_order(&self, id: NodeId, out: &mut Vec<NodeId>) {
        if let Some(children) = self.node(id).children {
            for child in children {
                self.collect_post_order(child, out);
            }
        }
        out.push(id);
    }
}

impl Index<NodeId> for SurfaceTree {
    type Output = SurfaceNode;

    fn index(&self, id: NodeId) -> &SurfaceNode {
        self.node(id)
    }
}

impl IndexMut<NodeId> for SurfaceTree {
    fn index_mut(&mut self, id: NodeId) -> &mut SurfaceNode {
        self.node_mut(id)
    }
}
