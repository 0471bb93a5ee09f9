//! The planet surface: six face quadtrees plus the streaming machinery that
//! keeps their textures resident.

use std::sync::Arc;

use glam::{DMat4, DVec3};
use terra_config::{StreamingConfig, SurfaceConfig};
use terra_cubesphere::{CubeFace, TileAddress};
use tracing::{info, trace, warn};

use crate::binder::{BindReport, bind_ready_tiles};
use crate::builder::TreeBuilder;
use crate::decode::ImageDecoder;
use crate::error::SurfaceError;
use crate::evictor::Evictor;
use crate::graphics::SurfaceGraphics;
use crate::mesh::PatchMeshSet;
use crate::node::{NodeId, StreamState, SurfaceNode, SurfaceTree};
use crate::renderer::{FrameStats, LodSelector};
use crate::streaming::TileStreamer;

/// A renderable planet surface.
///
/// Owns the node arena, the loader pool and the list of streamed tiles that
/// are resident on the GPU. Textures live in the graphics context passed to
/// each call; call [`release`](Self::release) with the same context before
/// dropping the surface.
pub struct PlanetSurface {
    tree: SurfaceTree,
    config: SurfaceConfig,
    selector: LodSelector,
    evictor: Evictor,
    streamer: TileStreamer,
    meshes: PatchMeshSet,
    resident: Vec<NodeId>,
    frame: u64,
    released: bool,
}

impl PlanetSurface {
    /// Build all six face trees, start the loader pool and upload the root
    /// tiles.
    ///
    /// Fails on an unsupported tree depth or if no loader thread can be
    /// started. Missing root tiles are not fatal; those faces draw
    /// placeholders.
    pub fn build<G: SurfaceGraphics>(
        config: &SurfaceConfig,
        streaming: &StreamingConfig,
        decoder: Arc<dyn ImageDecoder>,
        meshes: PatchMeshSet,
        gfx: &mut G,
    ) -> Result<Self, SurfaceError> {
        let builder = TreeBuilder::new(config.max_levels, config.texture_levels)?;
        let streamer = TileStreamer::new(streaming, config.tile_root.clone(), Arc::clone(&decoder))?;

        let mut tree = builder.build();
        let roots = TreeBuilder::load_roots(&mut tree, decoder.as_ref(), &config.tile_root, gfx);

        info!(
            "Planet surface built: {} nodes, depth {}, {}/6 root tiles, {} loader threads",
            tree.len(),
            config.max_levels,
            roots,
            streamer.worker_count()
        );

        Ok(Self {
            tree,
            config: config.clone(),
            selector: LodSelector::from_config(config),
            evictor: Evictor::new(config.eviction_ticks),
            streamer,
            meshes,
            resident: Vec::new(),
            frame: 0,
            released: false,
        })
    }

    /// Render one frame: bind finished loads, walk the faces from
    /// `camera`, then age and evict unused tiles.
    pub fn render<G: SurfaceGraphics>(
        &mut self,
        gfx: &mut G,
        camera: DVec3,
        planet_transform: &DMat4,
    ) -> FrameStats {
        self.frame += 1;
        let mut stats = FrameStats {
            frame: self.frame,
            ..FrameStats::default()
        };

        let report = self.bind_ready_textures(gfx);
        stats.bound = report.bound;
        stats.bind_failures = report.failed;

        self.selector.traverse(
            &mut self.tree,
            &self.streamer,
            &self.meshes,
            gfx,
            camera,
            planet_transform,
            &mut stats,
        );

        stats.evicted = self.evict_stale_textures(gfx);
        stats.resident = self.resident.len();

        trace!(
            frame = stats.frame,
            leaves = stats.leaves_drawn,
            subdivided = stats.subdivided,
            fallback = stats.fallback_draws,
            placeholder = stats.placeholder_draws,
            requested = stats.loads_requested,
            deferred = stats.loads_deferred,
            bound = stats.bound,
            evicted = stats.evicted,
            resident = stats.resident,
            "surface frame"
        );
        stats
    }

    /// Drain the ready queue and upload every decoded tile.
    pub fn bind_ready_textures<G: SurfaceGraphics>(&mut self, gfx: &mut G) -> BindReport {
        bind_ready_tiles(&mut self.tree, &self.streamer, gfx, &mut self.resident)
    }

    /// Age resident tiles by one frame and free those unused for
    /// `eviction_ticks` frames. Returns how many were evicted.
    pub fn evict_stale_textures<G: SurfaceGraphics>(&mut self, gfx: &mut G) -> usize {
        self.evictor
            .evict_stale(&mut self.tree, &mut self.resident, gfx)
    }

    /// Cancel an outstanding load. The node becomes requestable again; a
    /// result that is already decoding is dropped by the binder.
    pub fn cancel_load(&mut self, id: NodeId) -> bool {
        let node = &mut self.tree[id];
        if node.state != StreamState::Loading {
            return false;
        }
        self.streamer.cancel(id);
        node.state = StreamState::Unrequested;
        true
    }

    /// Stop the loader pool and free every texture, deepest nodes first.
    ///
    /// Returns the number of textures deleted. The surface keeps drawing
    /// placeholders if rendered afterwards.
    pub fn release<G: SurfaceGraphics>(&mut self, gfx: &mut G) -> usize {
        self.streamer.shutdown();

        let mut freed = 0;
        for root in self.tree.roots() {
            for id in self.tree.post_order(root) {
                let node = &mut self.tree[id];
                if let Some(textures) = node.textures.take() {
                    gfx.delete_texture(textures.albedo);
                    gfx.delete_texture(textures.elevation);
                    freed += 2;
                }
                node.fallback = None;
                node.pending = None;
                if node.state != StreamState::Failed {
                    node.state = StreamState::Unrequested;
                }
            }
        }
        self.resident.clear();
        self.released = true;

        info!("Planet surface released: {} textures freed", freed);
        freed
    }

    /// Node arena.
    pub fn tree(&self) -> &SurfaceTree {
        &self.tree
    }

    /// Node by id.
    pub fn node(&self, id: NodeId) -> &SurfaceNode {
        &self.tree[id]
    }

    /// Root of a face.
    pub fn root(&self, face: CubeFace) -> NodeId {
        self.tree.root(face)
    }

    /// Node for a tile address, if the tree is deep enough.
    pub fn find(&self, address: &TileAddress) -> Option<NodeId> {
        self.tree.find(address)
    }

    /// Streamed tiles currently resident, in bind order.
    pub fn resident(&self) -> &[NodeId] {
        &self.resident
    }

    /// The loader pool.
    pub fn streamer(&self) -> &TileStreamer {
        &self.streamer
    }

    /// Surface settings the surface was built with.
    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    /// LOD parameters.
    pub fn selector(&self) -> &LodSelector {
        &self.selector
    }

    /// Frames rendered so far.
    pub fn frame_count(&self) -> u64 {
        self.frame
    }
}

impl Drop for PlanetSurface {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let held = self.tree.iter().filter(|(_, n)| n.textures.is_some()).count();
        if held > 0 {
            warn!("Planet surface dropped without release; {held} nodes still hold textures");
        }
    }
}

impl std::fmt::Debug for PlanetSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanetSurface")
            .field("nodes", &self.tree.len())
            .field("resident", &self.resident.len())
            .field("in_flight", &self.streamer.in_flight_count())
            .field("frame", &self.frame)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DecodedImage, PngDecoder};
    use crate::graphics::{HeadlessGraphics, TextureSource};
    use std::path::Path;
    use std::sync::{Condvar, Mutex};
    use std::time::{Duration, Instant};

    const SEA: f64 = 1000.0;

    fn surface_config(max_levels: u8) -> SurfaceConfig {
        SurfaceConfig {
            max_levels,
            sea_level: SEA,
            ..SurfaceConfig::default()
        }
    }

    fn streaming_config() -> StreamingConfig {
        StreamingConfig {
            worker_threads: 2,
            max_in_flight: 32,
            result_capacity: 32,
        }
    }

    /// Decoder serving tiny tiles, failing any path containing `missing`.
    fn stub_decoder(missing: &'static str) -> Arc<dyn ImageDecoder> {
        Arc::new(move |path: &Path| -> Result<DecodedImage, SurfaceError> {
            let name = path.to_string_lossy();
            if !missing.is_empty() && name.contains(missing) {
                return Err(SurfaceError::missing(
                    path,
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                ));
            }
            if name.contains("elevation") {
                Ok(DecodedImage::filled(4, 4, &[128]))
            } else {
                Ok(DecodedImage::filled(4, 4, &[10, 120, 40]))
            }
        })
    }

    fn build(max_levels: u8, decoder: Arc<dyn ImageDecoder>) -> (PlanetSurface, HeadlessGraphics) {
        let mut gfx = HeadlessGraphics::new();
        let meshes = PatchMeshSet::upload_default(&mut gfx).unwrap();
        let surface = PlanetSurface::build(
            &surface_config(max_levels),
            &streaming_config(),
            decoder,
            meshes,
            &mut gfx,
        )
        .unwrap();
        (surface, gfx)
    }

    fn wait_ready(surface: &PlanetSurface, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while surface.streamer().ready_count() < count && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(surface.streamer().ready_count(), count, "loads did not finish in time");
    }

    fn near() -> DVec3 {
        DVec3::new(0.0, 0.0, 1.6 * SEA)
    }

    fn far() -> DVec3 {
        DVec3::new(0.0, 0.0, 10.0 * SEA)
    }

    fn pos_z_children(surface: &PlanetSurface) -> [NodeId; 4] {
        surface.node(surface.root(CubeFace::PosZ)).children().unwrap()
    }

    #[test]
    fn test_invalid_depth_is_rejected() {
        let mut gfx = HeadlessGraphics::new();
        let meshes = PatchMeshSet::upload_default(&mut gfx).unwrap();
        let err = PlanetSurface::build(
            &surface_config(0),
            &streaming_config(),
            stub_decoder(""),
            meshes,
            &mut gfx,
        )
        .unwrap_err();
        assert!(matches!(err, SurfaceError::InvalidDepth { max_levels: 0, .. }));
        assert_eq!(gfx.live_texture_count(), 0);
    }

    #[test]
    fn test_far_camera_draws_six_roots() {
        let (mut surface, mut gfx) = build(3, stub_decoder(""));
        assert_eq!(gfx.live_texture_count(), 12);

        let stats = surface.render(&mut gfx, far(), &DMat4::IDENTITY);
        assert_eq!(stats.frame, 1);
        assert_eq!(stats.leaves_drawn, 6);
        assert_eq!(stats.own_draws, 6);
        assert_eq!(stats.loads_requested, 0);
        assert_eq!(surface.streamer().in_flight_count(), 0);

        surface.release(&mut gfx);
    }

    #[test]
    fn test_near_camera_streams_children() {
        let (mut surface, mut gfx) = build(3, stub_decoder(""));

        let stats = surface.render(&mut gfx, near(), &DMat4::IDENTITY);
        assert_eq!(stats.subdivided, 1);
        assert_eq!(stats.loads_requested, 4);
        assert_eq!(stats.fallback_draws, 4);
        for child in pos_z_children(&surface) {
            assert!(surface.node(child).is_loading());
            assert!(surface.streamer().is_pending(child));
        }

        wait_ready(&surface, 4);
        gfx.begin_frame();
        let stats = surface.render(&mut gfx, near(), &DMat4::IDENTITY);
        assert_eq!(stats.bound, 4);
        assert_eq!(stats.own_draws, 9);
        assert_eq!(stats.fallback_draws, 0);
        assert_eq!(surface.resident().len(), 4);

        for child in pos_z_children(&surface) {
            let node = surface.node(child);
            assert!(node.is_texture_loaded());
            assert_eq!(node.ticks_since_last_use(), 0);
            let textures = node.textures().unwrap();
            assert!(gfx.is_live(textures.albedo));
            assert_eq!(gfx.texture(textures.elevation).unwrap().channels, 1);
        }
        assert!(
            gfx.draws()
                .iter()
                .all(|d| d.source == TextureSource::Own && d.textures.is_some())
        );

        surface.release(&mut gfx);
        assert_eq!(gfx.live_texture_count(), 0);
        assert_eq!(gfx.invalid_delete_count(), 0);
    }

    #[test]
    fn test_moving_away_evicts_children() {
        let (mut surface, mut gfx) = build(3, stub_decoder(""));
        surface.render(&mut gfx, near(), &DMat4::IDENTITY);
        wait_ready(&surface, 4);
        surface.render(&mut gfx, near(), &DMat4::IDENTITY);

        let children = pos_z_children(&surface);
        let textures: Vec<_> = children
            .iter()
            .map(|&c| surface.node(c).textures().unwrap())
            .collect();

        let ttl = surface.config().eviction_ticks;
        let mut evicted = 0;
        for _ in 1..ttl {
            evicted += surface.render(&mut gfx, far(), &DMat4::IDENTITY).evicted;
        }
        assert_eq!(evicted, 0);
        assert_eq!(surface.resident().len(), 4);
        assert_eq!(surface.node(children[0]).ticks_since_last_use(), ttl - 1);

        let stats = surface.render(&mut gfx, far(), &DMat4::IDENTITY);
        assert_eq!(stats.evicted, 4);
        assert_eq!(stats.resident, 0);
        for (&child, pair) in children.iter().zip(&textures) {
            let node = surface.node(child);
            assert_eq!(node.state(), StreamState::Unrequested);
            assert!(node.textures().is_none());
            assert!(!gfx.is_live(pair.albedo));
            assert!(!gfx.is_live(pair.elevation));
        }

        // Roots are pinned and survive any number of idle frames.
        for _ in 0..ttl {
            surface.render(&mut gfx, DVec3::new(50.0 * SEA, 0.0, 0.0), &DMat4::IDENTITY);
        }
        assert_eq!(gfx.live_texture_count(), 12);
        assert_eq!(gfx.invalid_delete_count(), 0);
        surface.release(&mut gfx);
    }

    #[test]
    fn test_evicted_tile_streams_again() {
        let (mut surface, mut gfx) = build(2, stub_decoder(""));
        surface.render(&mut gfx, near(), &DMat4::IDENTITY);
        wait_ready(&surface, 4);
        surface.render(&mut gfx, near(), &DMat4::IDENTITY);
        for _ in 0..surface.config().eviction_ticks {
            surface.render(&mut gfx, far(), &DMat4::IDENTITY);
        }
        assert!(surface.resident().is_empty());

        let stats = surface.render(&mut gfx, near(), &DMat4::IDENTITY);
        assert_eq!(stats.loads_requested, 4);
        wait_ready(&surface, 4);
        let stats = surface.render(&mut gfx, near(), &DMat4::IDENTITY);
        assert_eq!(stats.bound, 4);
        surface.release(&mut gfx);
    }

    #[test]
    fn test_static_camera_converges() {
        let (mut surface, mut gfx) = build(4, stub_decoder(""));
        let camera = DVec3::new(0.2 * SEA, 0.1 * SEA, 1.05 * SEA);

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let stats = surface.render(&mut gfx, camera, &DMat4::IDENTITY);
            let idle = stats.loads_requested == 0
                && stats.bound == 0
                && surface.streamer().in_flight_count() == 0;
            if idle || Instant::now() > deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        let settled: Vec<_> = surface.resident().to_vec();
        assert!(!settled.is_empty());
        for _ in 0..20 {
            let stats = surface.render(&mut gfx, camera, &DMat4::IDENTITY);
            assert_eq!(stats.loads_requested, 0);
            assert_eq!(stats.evicted, 0);
            assert_eq!(stats.fallback_draws, 0);
        }
        assert_eq!(surface.resident(), settled.as_slice());
        surface.release(&mut gfx);
    }

    #[test]
    fn test_failed_tile_is_not_retried() {
        let (mut surface, mut gfx) = build(2, stub_decoder("2_4_1_1"));
        surface.render(&mut gfx, near(), &DMat4::IDENTITY);
        wait_ready(&surface, 4);

        let stats = surface.render(&mut gfx, near(), &DMat4::IDENTITY);
        assert_eq!(stats.bound, 3);
        assert_eq!(stats.bind_failures, 1);

        let failed = surface
            .find(&TileAddress::new(CubeFace::PosZ, 2, 1, 1))
            .unwrap();
        assert_eq!(surface.node(failed).state(), StreamState::Failed);

        for _ in 0..5 {
            let stats = surface.render(&mut gfx, near(), &DMat4::IDENTITY);
            assert_eq!(stats.loads_requested, 0);
            assert_eq!(stats.fallback_draws, 1);
        }
        surface.release(&mut gfx);
    }

    #[test]
    fn test_missing_root_draws_placeholders() {
        let (mut surface, mut gfx) = build(2, stub_decoder("1_3_0_0"));
        assert_eq!(gfx.live_texture_count(), 10);

        let stats = surface.render(&mut gfx, far(), &DMat4::IDENTITY);
        assert_eq!(stats.placeholder_draws, 1);
        assert_eq!(stats.own_draws, 5);
        assert_eq!(stats.loads_requested, 0);
        surface.release(&mut gfx);
    }

    #[test]
    fn test_cancel_load_discards_result() {
        let (mut surface, mut gfx) = build(2, stub_decoder(""));
        surface.render(&mut gfx, near(), &DMat4::IDENTITY);
        let child = pos_z_children(&surface)[2];
        assert!(surface.cancel_load(child));
        assert!(!surface.cancel_load(child));
        assert_eq!(surface.node(child).state(), StreamState::Unrequested);

        let deadline = Instant::now() + Duration::from_secs(10);
        // Wait until nothing is left decoding.
        while (surface.streamer().ready_count() < 3
            || surface.streamer().in_flight_count() > surface.streamer().ready_count())
            && Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(2));
        }
        let report = surface.bind_ready_textures(&mut gfx);
        assert_eq!(report.bound, 3);
        assert!(!surface.node(child).is_texture_loaded());
        surface.release(&mut gfx);
    }

    #[test]
    fn test_blocked_loads_are_requested_once() {
        // Decoding blocks while `held` is set; root tiles load before it is.
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let worker_gate = Arc::clone(&gate);
        let decoder: Arc<dyn ImageDecoder> =
            Arc::new(move |_: &Path| -> Result<DecodedImage, SurfaceError> {
                let (lock, cvar) = &*worker_gate;
                let mut held = lock.lock().unwrap();
                while *held {
                    held = cvar.wait(held).unwrap();
                }
                Ok(DecodedImage::filled(2, 2, &[7]))
            });
        let streaming = StreamingConfig {
            worker_threads: 2,
            max_in_flight: 512,
            result_capacity: 512,
        };
        let mut gfx = HeadlessGraphics::new();
        let meshes = PatchMeshSet::upload_default(&mut gfx).unwrap();
        let mut surface =
            PlanetSurface::build(&surface_config(6), &streaming, decoder, meshes, &mut gfx)
                .unwrap();
        *gate.0.lock().unwrap() = true;

        let camera = DVec3::new(0.0, 0.0, 1.001 * SEA);
        let mut total = 0;
        for frame in 0..10 {
            let stats = surface.render(&mut gfx, camera, &DMat4::IDENTITY);
            assert_eq!(stats.loads_deferred, 0);
            assert_eq!(stats.bound, 0);
            if frame == 0 {
                assert!(stats.loads_requested > 0);
            } else {
                assert_eq!(stats.loads_requested, 0, "frame {frame} re-requested");
            }
            total += stats.loads_requested;
        }

        let loading = surface
            .tree()
            .iter()
            .filter(|(_, node)| node.state() == StreamState::Loading)
            .count();
        assert_eq!(total, loading);
        assert_eq!(surface.streamer().in_flight_count(), loading);

        *gate.0.lock().unwrap() = false;
        gate.1.notify_all();
        wait_ready(&surface, loading);
        let stats = surface.render(&mut gfx, camera, &DMat4::IDENTITY);
        assert_eq!(stats.bound, loading);
        surface.release(&mut gfx);
    }

    #[test]
    fn test_release_with_loads_in_flight() {
        let slow: Arc<dyn ImageDecoder> =
            Arc::new(|_: &Path| -> Result<DecodedImage, SurfaceError> {
                std::thread::sleep(Duration::from_millis(20));
                Ok(DecodedImage::filled(2, 2, &[1]))
            });
        let mut gfx = HeadlessGraphics::new();
        let meshes = PatchMeshSet::upload_default(&mut gfx).unwrap();
        let mut surface = PlanetSurface::build(
            &surface_config(4),
            &streaming_config(),
            slow,
            meshes,
            &mut gfx,
        )
        .unwrap();

        let stats = surface.render(&mut gfx, DVec3::new(0.0, 0.0, 1.01 * SEA), &DMat4::IDENTITY);
        assert!(stats.loads_requested > 0);

        let freed = surface.release(&mut gfx);
        assert_eq!(freed, 12);
        assert_eq!(gfx.live_texture_count(), 0);
        assert_eq!(gfx.invalid_delete_count(), 0);
        assert_eq!(surface.streamer().in_flight_count(), 0);
        drop(surface);
    }

    #[test]
    fn test_streams_png_pyramid_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("elevation")).unwrap();
        for face in CubeFace::ALL {
            let mut tiles = vec![TileAddress::root(face)];
            tiles.extend(TileAddress::root(face).children().unwrap());
            for tile in tiles {
                image::RgbImage::from_pixel(8, 8, image::Rgb([30, 90, 200]))
                    .save(tile.albedo_path(dir.path()))
                    .unwrap();
                image::GrayImage::from_pixel(8, 8, image::Luma([64]))
                    .save(tile.elevation_path(dir.path()))
                    .unwrap();
            }
        }

        let config = SurfaceConfig {
            tile_root: dir.path().to_path_buf(),
            ..surface_config(2)
        };
        let mut gfx = HeadlessGraphics::new();
        let meshes = PatchMeshSet::upload_default(&mut gfx).unwrap();
        let mut surface = PlanetSurface::build(
            &config,
            &streaming_config(),
            Arc::new(PngDecoder),
            meshes,
            &mut gfx,
        )
        .unwrap();
        assert_eq!(gfx.live_texture_count(), 12);

        surface.render(&mut gfx, near(), &DMat4::IDENTITY);
        wait_ready(&surface, 4);
        let stats = surface.render(&mut gfx, near(), &DMat4::IDENTITY);
        assert_eq!(stats.bound, 4);
        assert_eq!(gfx.uploaded_bytes(), 16 * (8 * 8 * 3 + 8 * 8));

        surface.release(&mut gfx);
        assert_eq!(gfx.live_texture_count(), 0);
    }
}
