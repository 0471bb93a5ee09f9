//! Moves decoded tiles from the ready queue onto the GPU.

use tracing::{debug, warn};

use crate::graphics::SurfaceGraphics;
use crate::node::{NodeId, StreamState, SurfaceTree};
use crate::streaming::{TileStreamer, upload_tile};

/// What one binder pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BindReport {
    /// Tiles uploaded and now resident.
    pub bound: usize,
    /// Tiles that failed to decode or upload.
    pub failed: usize,
    /// Results dropped because the request was cancelled or the node moved on.
    pub discarded: usize,
}

/// Drain the ready queue and bind every tile in it.
///
/// Results are first staged on their nodes (`Loading → DataReady`), then
/// uploaded in publish order. Bound nodes are appended to `resident` with a
/// fresh age; decoded buffers are dropped as soon as they are uploaded.
pub fn bind_ready_tiles<G: SurfaceGraphics>(
    tree: &mut SurfaceTree,
    streamer: &TileStreamer,
    gfx: &mut G,
    resident: &mut Vec<NodeId>,
) -> BindReport {
    let mut report = BindReport::default();
    let mut staged = Vec::new();

    for loaded in streamer.drain_ready() {
        let node = &mut tree[loaded.node];
        if loaded.is_cancelled() || node.state != StreamState::Loading {
            report.discarded += 1;
            continue;
        }
        match loaded.result {
            Ok(images) => {
                debug!(
                    address = %loaded.address,
                    decode_us = loaded.decode_time_us,
                    "tile decoded"
                );
                node.pending = Some(images);
                node.state = StreamState::DataReady;
                staged.push(loaded.node);
            }
            Err(err) => {
                warn!(address = %loaded.address, error = %err, "tile load failed");
                node.state = StreamState::Failed;
                report.failed += 1;
            }
        }
    }

    for id in staged {
        let node = &mut tree[id];
        let Some(images) = node.pending.take() else {
            continue;
        };
        match upload_tile(gfx, &node.address, &images) {
            Ok(textures) => {
                node.textures = Some(textures);
                node.state = StreamState::Bound;
                node.ticks_since_last_use = 0;
                node.touched = false;
                resident.push(id);
                report.bound += 1;
            }
            Err(err) => {
                warn!(address = %node.address, error = %err, "tile upload failed");
                node.state = StreamState::Failed;
                report.failed += 1;
            }
        }
    }

    report
}
