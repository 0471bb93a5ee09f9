//! Tile streaming: a bounded pool of decode workers feeding a ready queue.
//!
//! The render thread submits [`LoadRequest`]s; workers decode the albedo and
//! elevation images and publish a [`LoadedTile`] on a bounded result channel
//! that the binder drains once per frame. Workers never touch node state, so
//! every state transition happens on the render thread.
//!
//! Each request carries a cancellation token. Workers check it before
//! decoding and the binder checks it before committing an upload, so results
//! of cancelled requests are dropped on the floor.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use dashmap::DashMap;
use terra_config::StreamingConfig;
use terra_cubesphere::TileAddress;
use tracing::debug;

use crate::decode::{DecodedImage, ImageDecoder};
use crate::error::SurfaceError;
use crate::graphics::{SurfaceGraphics, TexturePair};
use crate::node::NodeId;

/// Decoded pixels of one tile.
#[derive(Debug)]
pub struct TileImages {
    /// Color image, normally RGB.
    pub albedo: DecodedImage,
    /// Height image, normally single channel.
    pub elevation: DecodedImage,
}

/// Decode both images of a tile on the calling thread.
pub fn load_tile_sync(
    decoder: &dyn ImageDecoder,
    tile_root: &Path,
    address: &TileAddress,
) -> Result<TileImages, SurfaceError> {
    let albedo = decoder.decode(&address.albedo_path(tile_root))?;
    let elevation = decoder.decode(&address.elevation_path(tile_root))?;
    Ok(TileImages { albedo, elevation })
}

/// Upload both images of a tile. If the second upload fails the first
/// texture is deleted again, so nothing leaks.
pub fn upload_tile<G: SurfaceGraphics>(
    gfx: &mut G,
    address: &TileAddress,
    images: &TileImages,
) -> Result<TexturePair, SurfaceError> {
    let albedo = gfx.create_texture(&format!("albedo {address}"), &images.albedo)?;
    match gfx.create_texture(&format!("elevation {address}"), &images.elevation) {
        Ok(elevation) => Ok(TexturePair { albedo, elevation }),
        Err(err) => {
            gfx.delete_texture(albedo);
            Err(err.into())
        }
    }
}

/// A request to decode the tile of one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadRequest {
    /// Node that will own the textures.
    pub node: NodeId,
    /// Tile to read.
    pub address: TileAddress,
}

/// Outcome of a load, published on the ready queue.
#[derive(Debug)]
pub struct LoadedTile {
    /// Node the request was made for.
    pub node: NodeId,
    /// Tile that was read.
    pub address: TileAddress,
    /// Decoded images or the decode failure.
    pub result: Result<TileImages, SurfaceError>,
    /// Wall time spent decoding, in microseconds.
    pub decode_time_us: u64,
    cancelled: Arc<AtomicBool>,
}

impl LoadedTile {
    /// Whether the request was cancelled after it was submitted.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct QueuedLoad {
    request: LoadRequest,
    cancelled: Arc<AtomicBool>,
}

/// Bounded pool of tile decode workers.
pub struct TileStreamer {
    task_sender: Option<Sender<QueuedLoad>>,
    result_receiver: Option<Receiver<LoadedTile>>,
    /// Cancellation token of the latest request per node.
    active: Arc<DashMap<NodeId, Arc<AtomicBool>>>,
    /// Requests submitted and not yet drained (or skipped after cancellation).
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
    workers: Vec<JoinHandle<()>>,
}

impl TileStreamer {
    /// Spawn the worker pool described by `config`.
    pub fn new(
        config: &StreamingConfig,
        tile_root: PathBuf,
        decoder: Arc<dyn ImageDecoder>,
    ) -> Result<Self, SurfaceError> {
        let thread_count = if config.worker_threads == 0 {
            num_cpus::get().saturating_sub(2).max(1)
        } else {
            config.worker_threads
        };
        let max_in_flight = config.max_in_flight.max(1);

        let (task_sender, task_receiver) = bounded::<QueuedLoad>(max_in_flight);
        let (result_sender, result_receiver) = bounded::<LoadedTile>(config.result_capacity.max(1));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let tile_root = Arc::new(tile_root);

        let mut workers = Vec::with_capacity(thread_count);
        for index in 0..thread_count {
            let receiver = task_receiver.clone();
            let sender = result_sender.clone();
            let in_flight = Arc::clone(&in_flight);
            let decoder = Arc::clone(&decoder);
            let tile_root = Arc::clone(&tile_root);

            let handle = std::thread::Builder::new()
                .name(format!("tile-loader-{index}"))
                .spawn(move || {
                    while let Ok(queued) = receiver.recv() {
                        if queued.cancelled.load(Ordering::Acquire) {
                            in_flight.fetch_sub(1, Ordering::AcqRel);
                            continue;
                        }

                        let start = Instant::now();
                        let result =
                            load_tile_sync(decoder.as_ref(), &tile_root, &queued.request.address);
                        let decode_time_us = start.elapsed().as_micros() as u64;

                        let loaded = LoadedTile {
                            node: queued.request.node,
                            address: queued.request.address,
                            result,
                            decode_time_us,
                            cancelled: queued.cancelled,
                        };
                        // The receiver is gone only during shutdown.
                        if sender.send(loaded).is_err() {
                            in_flight.fetch_sub(1, Ordering::AcqRel);
                        }
                    }
                })
                .map_err(SurfaceError::WorkerSpawn)?;
            workers.push(handle);
        }

        debug!(thread_count, max_in_flight, "tile streamer started");

        Ok(Self {
            task_sender: Some(task_sender),
            result_receiver: Some(result_receiver),
            active: Arc::new(DashMap::new()),
            in_flight,
            max_in_flight,
            workers,
        })
    }

    /// Queue a load. Returns the request back when the pool is saturated or
    /// shut down; the caller retries on a later frame.
    pub fn submit(&self, request: LoadRequest) -> Result<(), LoadRequest> {
        let Some(sender) = &self.task_sender else {
            return Err(request);
        };
        if self.in_flight.load(Ordering::Acquire) >= self.max_in_flight {
            return Err(request);
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.active.insert(request.node, Arc::clone(&cancelled));

        sender
            .try_send(QueuedLoad {
                request,
                cancelled: Arc::clone(&cancelled),
            })
            .map_err(|e| {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                self.active
                    .remove_if(&request.node, |_, token| Arc::ptr_eq(token, &cancelled));
                match e {
                    TrySendError::Full(q) | TrySendError::Disconnected(q) => q.request,
                }
            })
    }

    /// Cancel the outstanding request for `node`. Returns `false` if none was
    /// pending.
    pub fn cancel(&self, node: NodeId) -> bool {
        match self.active.remove(&node) {
            Some((_, cancelled)) => {
                cancelled.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Cancel every outstanding request.
    pub fn cancel_all(&self) {
        self.active.retain(|_, cancelled| {
            cancelled.store(true, Ordering::Release);
            false
        });
    }

    /// Take every published result, in publish order.
    ///
    /// Call once per frame on the render thread.
    pub fn drain_ready(&self) -> Vec<LoadedTile> {
        let Some(receiver) = &self.result_receiver else {
            return Vec::new();
        };
        let mut results = Vec::with_capacity(receiver.len());
        while let Ok(loaded) = receiver.try_recv() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            self.active
                .remove_if(&loaded.node, |_, token| Arc::ptr_eq(token, &loaded.cancelled));
            results.push(loaded);
        }
        results
    }

    /// Results published and waiting to be drained.
    pub fn ready_count(&self) -> usize {
        self.result_receiver.as_ref().map_or(0, Receiver::len)
    }

    /// Requests queued, decoding, or published but not yet drained.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Whether a live (uncancelled) request exists for `node`.
    pub fn is_pending(&self, node: NodeId) -> bool {
        self.active.contains_key(&node)
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Cancel everything, close both channels and join the workers.
    ///
    /// Workers blocked on a full ready queue are released because the
    /// receiving side is dropped first. Idempotent.
    pub fn shutdown(&mut self) {
        if self.task_sender.is_none() && self.workers.is_empty() {
            return;
        }
        self.cancel_all();
        self.result_receiver.take();
        self.task_sender.take();
        let joined = self.workers.len();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        self.in_flight.store(0, Ordering::Release);
        debug!(joined, "tile streamer shut down");
    }
}

impl Drop for TileStreamer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use terra_cubesphere::CubeFace;

    fn config(workers: usize, max_in_flight: usize) -> StreamingConfig {
        StreamingConfig {
            worker_threads: workers,
            max_in_flight,
            result_capacity: 64,
        }
    }

    fn solid_decoder() -> Arc<dyn ImageDecoder> {
        Arc::new(|path: &Path| -> Result<DecodedImage, SurfaceError> {
            if path.to_string_lossy().contains("elevation") {
                Ok(DecodedImage::filled(2, 2, &[9]))
            } else {
                Ok(DecodedImage::filled(2, 2, &[1, 2, 3]))
            }
        })
    }

    /// Decoder that blocks until the test opens the gate.
    fn gated_decoder() -> (Arc<dyn ImageDecoder>, Arc<(Mutex<bool>, std::sync::Condvar)>) {
        let gate = Arc::new((Mutex::new(false), std::sync::Condvar::new()));
        let worker_gate = Arc::clone(&gate);
        let decoder: Arc<dyn ImageDecoder> =
            Arc::new(move |_: &Path| -> Result<DecodedImage, SurfaceError> {
                let (lock, cvar) = &*worker_gate;
                let mut open = lock.lock().unwrap();
                while !*open {
                    open = cvar.wait(open).unwrap();
                }
                Ok(DecodedImage::filled(1, 1, &[0]))
            });
        (decoder, gate)
    }

    fn open_gate(gate: &(Mutex<bool>, std::sync::Condvar)) {
        *gate.0.lock().unwrap() = true;
        gate.1.notify_all();
    }

    fn request(n: u32, x: u32) -> LoadRequest {
        LoadRequest {
            node: NodeId(n),
            address: TileAddress::new(CubeFace::PosZ, 4, x, 0),
        }
    }

    fn drain_until(streamer: &TileStreamer, count: usize) -> Vec<LoadedTile> {
        let mut results = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        while results.len() < count && Instant::now() < deadline {
            results.extend(streamer.drain_ready());
            std::thread::sleep(Duration::from_millis(2));
        }
        results
    }

    #[test]
    fn test_load_tile_sync_reads_both_paths() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let decoder = move |path: &Path| -> Result<DecodedImage, SurfaceError> {
            log.lock().unwrap().push(path.to_path_buf());
            Ok(DecodedImage::filled(1, 1, &[0]))
        };
        let addr = TileAddress::new(CubeFace::NegX, 2, 1, 0);
        load_tile_sync(&decoder, Path::new("/tiles"), &addr).unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                PathBuf::from("/tiles/2_1_1_0.png"),
                PathBuf::from("/tiles/elevation/e_2_1_1_0.png"),
            ]
        );
    }

    #[test]
    fn test_upload_tile_rolls_back_on_failure() {
        use crate::graphics::HeadlessGraphics;

        let mut gfx = HeadlessGraphics::new();
        let images = TileImages {
            albedo: DecodedImage::filled(2, 2, &[1, 2, 3]),
            elevation: DecodedImage::new(2, 2, 1, vec![0; 3]),
        };
        let addr = TileAddress::root(CubeFace::PosY);
        assert!(upload_tile(&mut gfx, &addr, &images).is_err());
        assert_eq!(gfx.live_texture_count(), 0);
        assert_eq!(gfx.deleted_textures().len(), 1);
    }

    #[test]
    fn test_all_submitted_tiles_are_published() {
        let streamer =
            TileStreamer::new(&config(3, 32), PathBuf::from("tiles"), solid_decoder()).unwrap();
        assert_eq!(streamer.worker_count(), 3);

        for i in 0..8 {
            streamer.submit(request(i, i)).unwrap();
        }
        let results = drain_until(&streamer, 8);
        assert_eq!(results.len(), 8);
        for loaded in &results {
            let images = loaded.result.as_ref().unwrap();
            assert_eq!(images.albedo.channels, 3);
            assert_eq!(images.elevation.channels, 1);
            assert!(!streamer.is_pending(loaded.node));
        }
        assert_eq!(streamer.in_flight_count(), 0);
    }

    #[test]
    fn test_submit_rejects_past_capacity() {
        let (decoder, gate) = gated_decoder();
        let streamer = TileStreamer::new(&config(1, 2), PathBuf::from("tiles"), decoder).unwrap();

        assert!(streamer.submit(request(0, 0)).is_ok());
        assert!(streamer.submit(request(1, 1)).is_ok());
        let rejected = streamer.submit(request(2, 2));
        assert_eq!(rejected, Err(request(2, 2)));
        assert!(!streamer.is_pending(NodeId(2)));

        open_gate(&gate);
        assert_eq!(drain_until(&streamer, 2).len(), 2);
        assert!(streamer.submit(request(2, 2)).is_ok());
    }

    #[test]
    fn test_cancelled_results_are_flagged_or_skipped() {
        let (decoder, gate) = gated_decoder();
        let streamer = TileStreamer::new(&config(1, 8), PathBuf::from("tiles"), decoder).unwrap();

        streamer.submit(request(0, 0)).unwrap();
        streamer.submit(request(1, 1)).unwrap();
        assert!(streamer.cancel(NodeId(1)));
        assert!(!streamer.cancel(NodeId(1)));
        assert!(!streamer.is_pending(NodeId(1)));

        open_gate(&gate);
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut results = Vec::new();
        while streamer.in_flight_count() > 0 && Instant::now() < deadline {
            results.extend(streamer.drain_ready());
            std::thread::sleep(Duration::from_millis(2));
        }

        assert!(results.iter().any(|r| r.node == NodeId(0) && !r.is_cancelled()));
        // Node 1 was either skipped before decoding or published flagged.
        assert!(
            results
                .iter()
                .filter(|r| r.node == NodeId(1))
                .all(LoadedTile::is_cancelled)
        );
    }

    #[test]
    fn test_resubmit_after_cancel_keeps_new_token() {
        let (decoder, gate) = gated_decoder();
        let streamer = TileStreamer::new(&config(1, 8), PathBuf::from("tiles"), decoder).unwrap();

        streamer.submit(request(5, 0)).unwrap();
        streamer.cancel(NodeId(5));
        streamer.submit(request(5, 0)).unwrap();
        open_gate(&gate);

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut live = None;
        while live.is_none() && Instant::now() < deadline {
            live = streamer
                .drain_ready()
                .into_iter()
                .find(|r| !r.is_cancelled());
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(live.map(|r| r.node), Some(NodeId(5)));
        assert!(!streamer.is_pending(NodeId(5)));
    }

    #[test]
    fn test_decode_failure_is_published() {
        let decoder: Arc<dyn ImageDecoder> =
            Arc::new(|path: &Path| -> Result<DecodedImage, SurfaceError> {
                Err(SurfaceError::missing(
                    path,
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                ))
            });
        let streamer = TileStreamer::new(&config(1, 4), PathBuf::from("tiles"), decoder).unwrap();
        streamer.submit(request(3, 3)).unwrap();

        let results = drain_until(&streamer, 1);
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0].result,
            Err(SurfaceError::ResourceMissing { .. })
        ));
    }

    #[test]
    fn test_shutdown_with_blocked_workers() {
        let (decoder, gate) = gated_decoder();
        let mut streamer =
            TileStreamer::new(&config(2, 8), PathBuf::from("tiles"), decoder).unwrap();
        for i in 0..6 {
            streamer.submit(request(i, i)).unwrap();
        }
        open_gate(&gate);
        streamer.shutdown();
        assert_eq!(streamer.worker_count(), 0);
        assert!(streamer.submit(request(9, 9)).is_err());
        assert!(streamer.drain_ready().is_empty());
        streamer.shutdown();
    }
}
