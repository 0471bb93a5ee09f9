//! Face-plane to cube to unit-sphere projection.

use glam::{DVec2, DVec3};

/// Analytic cube-to-sphere using the Everitt/Mathworld mapping.
///
/// ```text
/// sx = x * sqrt(1 - y²/2 - z²/2 + y²z²/3)
/// sy = y * sqrt(1 - x²/2 - z²/2 + x²z²/3)
/// sz = z * sqrt(1 - x²/2 - y²/2 + x²y²/3)
/// ```
///
/// The mapping commutes with axis permutations and sign flips, so it can be
/// applied in a face's local frame before the base rotation.
#[inline]
#[must_use]
pub fn cube_to_sphere_everitt(cube_point: DVec3) -> DVec3 {
    let x2 = cube_point.x * cube_point.x;
    let y2 = cube_point.y * cube_point.y;
    let z2 = cube_point.z * cube_point.z;

    DVec3::new(
        cube_point.x * (1.0 - y2 / 2.0 - z2 / 2.0 + y2 * z2 / 3.0).sqrt(),
        cube_point.y * (1.0 - x2 / 2.0 - z2 / 2.0 + x2 * z2 / 3.0).sqrt(),
        cube_point.z * (1.0 - x2 / 2.0 - y2 / 2.0 + x2 * y2 / 3.0).sqrt(),
    )
}

/// Project a patch translation in a face's local frame onto the unit sphere,
/// still in that local frame (face plane at `z = 1`).
#[inline]
#[must_use]
pub fn local_patch_to_sphere(translation: DVec2) -> DVec3 {
    cube_to_sphere_everitt(translation.extend(1.0))
}
