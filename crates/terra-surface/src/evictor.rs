//! Time-to-live eviction of streamed tile textures.

use tracing::debug;

use crate::graphics::SurfaceGraphics;
use crate::node::{NodeId, StreamState, SurfaceTree};

/// Frees textures of resident nodes that have not been sampled for `ttl`
/// consecutive frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Evictor {
    ttl: u32,
}

impl Evictor {
    /// Evict after `ttl` unused frames. A TTL of zero is treated as one.
    pub fn new(ttl: u32) -> Self {
        Self { ttl: ttl.max(1) }
    }

    /// Frames a texture may go unused.
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    /// Age every resident node by one frame and evict the stale ones.
    ///
    /// Nodes touched during this frame's traversal only have their mark
    /// cleared. Returns how many nodes were evicted.
    pub fn evict_stale<G: SurfaceGraphics>(
        &self,
        tree: &mut SurfaceTree,
        resident: &mut Vec<NodeId>,
        gfx: &mut G,
    ) -> usize {
        let mut evicted = 0;
        resident.retain(|&id| {
            let node = &mut tree[id];
            if node.pinned {
                return true;
            }
            if node.touched {
                node.touched = false;
                return true;
            }
            node.ticks_since_last_use = node.ticks_since_last_use.saturating_add(1);
            if node.ticks_since_last_use < self.ttl {
                return true;
            }

            if let Some(textures) = node.textures.take() {
                gfx.delete_texture(textures.albedo);
                gfx.delete_texture(textures.elevation);
            }
            node.state = StreamState::Unrequested;
            node.ticks_since_last_use = 0;
            debug!(address = %node.address, "tile evicted");
            evicted += 1;
            false
        });
        evicted
    }
}
