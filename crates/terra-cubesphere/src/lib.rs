//! Cube-sphere geometry for the planet surface: faces, base rotations, tile addressing and projection.

mod cube_face;
mod projection;
mod tile_address;

pub use cube_face::CubeFace;
pub use projection::{cube_to_sphere_everitt, local_patch_to_sphere};
pub use tile_address::{TileAddress, quadrant_offset};
