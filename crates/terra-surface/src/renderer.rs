//! Camera-driven level-of-detail selection and leaf draws.
//!
//! Every frame each face tree is walked from its root. A node splits when its
//! world-space footprint (`scale * sea_level * split_factor`) is larger than
//! its distance to the camera; otherwise it is drawn as a leaf with the best
//! texture currently resident:
//!
//! 1. the textured ancestor's tile (the node itself at shallow levels),
//! 2. a sub-rectangle of the face root's tile, while a load is requested,
//! 3. nothing, when even the root tile failed to load.

use glam::{DMat4, DVec2, DVec3};
use terra_config::SurfaceConfig;
use terra_cubesphere::local_patch_to_sphere;

use crate::graphics::{PatchDraw, PatchUniforms, SurfaceGraphics, TextureSource};
use crate::mesh::PatchMeshSet;
use crate::node::{NodeId, StreamState, SurfaceNode, SurfaceTree};
use crate::streaming::{LoadRequest, TileStreamer};

/// Counters for one rendered frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frame number, starting at 1.
    pub frame: u64,
    /// Tiles bound by the binder at the start of the frame.
    pub bound: usize,
    /// Tiles that failed to decode or upload this frame.
    pub bind_failures: usize,
    /// Leaf patches drawn.
    pub leaves_drawn: usize,
    /// Nodes that split into their children.
    pub subdivided: usize,
    /// Leaves drawn with their own tile.
    pub own_draws: usize,
    /// Leaves drawn with a sub-rectangle of their textured ancestor.
    pub ancestor_draws: usize,
    /// Leaves drawn with the face-root fallback.
    pub fallback_draws: usize,
    /// Leaves drawn without any texture.
    pub placeholder_draws: usize,
    /// Loads submitted to the streamer.
    pub loads_requested: usize,
    /// Loads rejected by back-pressure, retried next frame.
    pub loads_deferred: usize,
    /// Textures freed by the evictor.
    pub evicted: usize,
    /// Streamed tiles resident after eviction.
    pub resident: usize,
}

/// Decides which nodes split and builds the draw for each leaf.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LodSelector {
    sea_level: f64,
    split_factor: f64,
    max_levels: u8,
}

impl LodSelector {
    /// Selector with explicit parameters.
    pub fn new(sea_level: f64, split_factor: f64, max_levels: u8) -> Self {
        Self {
            sea_level,
            split_factor,
            max_levels,
        }
    }

    /// Selector using the surface settings.
    pub fn from_config(config: &SurfaceConfig) -> Self {
        Self::new(config.sea_level, config.lod_split_factor, config.max_levels)
    }

    /// Planet radius used for placement.
    pub fn sea_level(&self) -> f64 {
        self.sea_level
    }

    /// World-space centre of a node: its patch centre projected onto the
    /// sphere, scaled to sea level and placed by the planet transform.
    pub fn world_center(&self, node: &SurfaceNode, planet_transform: &DMat4) -> DVec3 {
        let on_sphere = node.base_rotation * local_patch_to_sphere(node.patch_translation);
        planet_transform.transform_point3(on_sphere * self.sea_level)
    }

    /// Whether a node at `distance` from the camera should be refined.
    pub fn should_subdivide(&self, node: &SurfaceNode, distance: f64) -> bool {
        node.level() < self.max_levels && node.scale * self.sea_level * self.split_factor > distance
    }

    /// Walk all six faces, drawing leaves and requesting missing tiles.
    #[allow(clippy::too_many_arguments)]
    pub fn traverse<G: SurfaceGraphics>(
        &self,
        tree: &mut SurfaceTree,
        streamer: &TileStreamer,
        meshes: &PatchMeshSet,
        gfx: &mut G,
        camera: DVec3,
        planet_transform: &DMat4,
        stats: &mut FrameStats,
    ) {
        let mut frame = Frame {
            tree,
            streamer,
            meshes,
            gfx,
            camera,
            planet_transform,
            stats,
        };
        for root in frame.tree.roots() {
            self.render_node(&mut frame, root);
        }
    }

    fn render_node<G: SurfaceGraphics>(&self, frame: &mut Frame<'_, G>, id: NodeId) {
        let node = &frame.tree[id];
        let distance = self
            .world_center(node, frame.planet_transform)
            .distance(frame.camera);

        if let Some(children) = node.children
            && self.should_subdivide(node, distance)
        {
            frame.stats.subdivided += 1;
            for child in children {
                self.render_node(frame, child);
            }
            return;
        }

        self.draw_leaf(frame, id);
    }

    fn draw_leaf<G: SurfaceGraphics>(&self, frame: &mut Frame<'_, G>, id: NodeId) {
        let node = &frame.tree[id];
        let target_id = node.textured_ancestor;
        let target = &frame.tree[target_id];

        let (textures, source, shift, scale) = match target.textures {
            Some(textures) if target.state == StreamState::Bound => {
                let source = if target_id == id {
                    TextureSource::Own
                } else {
                    TextureSource::Ancestor
                };
                (Some(textures), source, node.tex_shift, node.tex_scale)
            }
            _ => match node.fallback {
                Some(fallback) => (
                    Some(fallback),
                    TextureSource::Fallback,
                    node.tex_shift_lod,
                    node.tex_scale_lod,
                ),
                None => (None, TextureSource::Placeholder, DVec2::ZERO, 1.0),
            },
        };

        let draw = PatchDraw {
            address: node.address,
            mesh: frame.meshes.select(node.level()),
            textures,
            source,
            uniforms: self.uniforms(node, frame.camera, frame.planet_transform, shift, scale),
        };
        let target_state = target.state;
        frame.gfx.draw_patch(&draw);

        frame.stats.leaves_drawn += 1;
        match source {
            TextureSource::Own => frame.stats.own_draws += 1,
            TextureSource::Ancestor => frame.stats.ancestor_draws += 1,
            TextureSource::Fallback => frame.stats.fallback_draws += 1,
            TextureSource::Placeholder => frame.stats.placeholder_draws += 1,
        }

        match source {
            TextureSource::Own | TextureSource::Ancestor => frame.tree[target_id].touch(),
            _ if target_state == StreamState::Unrequested => request_load(frame, target_id),
            _ => {}
        }
    }

    fn uniforms(
        &self,
        node: &SurfaceNode,
        camera: DVec3,
        planet_transform: &DMat4,
        tex_shift: DVec2,
        tex_scale: f64,
    ) -> PatchUniforms {
        let mut face_to_view = *planet_transform * DMat4::from_quat(node.base_rotation);
        face_to_view.w_axis -= camera.extend(0.0);

        PatchUniforms {
            face_to_view: face_to_view.as_mat4().to_cols_array_2d(),
            patch: [
                node.patch_translation.x as f32,
                node.patch_translation.y as f32,
                node.scale as f32,
                self.sea_level as f32,
            ],
            tex: [
                tex_shift.x as f32,
                tex_shift.y as f32,
                tex_scale as f32,
                node.level() as f32,
            ],
        }
    }
}

struct Frame<'a, G> {
    tree: &'a mut SurfaceTree,
    streamer: &'a TileStreamer,
    meshes: &'a PatchMeshSet,
    gfx: &'a mut G,
    camera: DVec3,
    planet_transform: &'a DMat4,
    stats: &'a mut FrameStats,
}

fn request_load<G>(frame: &mut Frame<'_, G>, target: NodeId) {
    let node = &mut frame.tree[target];
    let request = LoadRequest {
        node: target,
        address: node.address,
    };
    match frame.streamer.submit(request) {
        Ok(()) => {
            node.state = StreamState::Loading;
            frame.stats.loads_requested += 1;
        }
        Err(_) => frame.stats.loads_deferred += 1,
    }
}
