//! Unique tile identifier in the pre-baked tile pyramid.

use std::path::{Path, PathBuf};

use glam::DVec2;

use crate::CubeFace;

/// Uniquely identifies a tile on the cube-sphere.
///
/// - `face`: which of the 6 cube faces the tile belongs to.
/// - `level`: depth in the pyramid. Level 1 is the whole face; every level
///   doubles the tile count along each axis.
/// - `x`, `y`: tile indices within the face at this level, in
///   `0..grid_size(level)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileAddress {
    /// Which cube face this tile belongs to.
    pub face: CubeFace,
    /// Pyramid level (1 = whole face).
    pub level: u8,
    /// Horizontal tile index (along the face tangent).
    pub x: u32,
    /// Vertical tile index (along the face bitangent).
    pub y: u32,
}

impl TileAddress {
    /// Deepest level a tile address can describe.
    pub const MAX_LEVEL: u8 = 24;

    /// Number of tiles along one axis at the given level.
    ///
    /// # Panics
    ///
    /// Panics if `level` is 0 or exceeds [`Self::MAX_LEVEL`].
    #[must_use]
    pub fn grid_size(level: u8) -> u32 {
        assert!(
            (1..=Self::MAX_LEVEL).contains(&level),
            "level {level} outside 1..={}",
            Self::MAX_LEVEL
        );
        1 << (level - 1)
    }

    /// Construct a `TileAddress`, validating `x` and `y` against the grid.
    ///
    /// # Panics
    ///
    /// Panics if `level` is invalid or `x`/`y` are out of range.
    #[must_use]
    pub fn new(face: CubeFace, level: u8, x: u32, y: u32) -> Self {
        let size = Self::grid_size(level);
        assert!(x < size, "x={x} out of range for level {level} (max {size})");
        assert!(y < size, "y={y} out of range for level {level} (max {size})");
        Self { face, level, x, y }
    }

    /// The level-1 tile covering the whole face.
    #[must_use]
    pub fn root(face: CubeFace) -> Self {
        Self {
            face,
            level: 1,
            x: 0,
            y: 0,
        }
    }

    /// The parent tile one level up, `None` for a root.
    #[must_use]
    pub fn parent(&self) -> Option<TileAddress> {
        if self.level <= 1 {
            return None;
        }
        Some(TileAddress {
            face: self.face,
            level: self.level - 1,
            x: self.x / 2,
            y: self.y / 2,
        })
    }

    /// The four children one level down, in quadrant order
    /// `[(2x, 2y), (2x+1, 2y), (2x, 2y+1), (2x+1, 2y+1)]`.
    ///
    /// Returns `None` at [`Self::MAX_LEVEL`].
    #[must_use]
    pub fn children(&self) -> Option<[TileAddress; 4]> {
        if self.level >= Self::MAX_LEVEL {
            return None;
        }
        Some(std::array::from_fn(|quadrant| self.child(quadrant)))
    }

    /// Child tile for quadrant `0..4` (`dx = q & 1`, `dy = q >> 1`).
    #[must_use]
    pub fn child(&self, quadrant: usize) -> TileAddress {
        debug_assert!(quadrant < 4, "quadrant {quadrant} out of range");
        let (dx, dy) = quadrant_offset(quadrant);
        TileAddress {
            face: self.face,
            level: self.level + 1,
            x: self.x * 2 + dx,
            y: self.y * 2 + dy,
        }
    }

    /// Centre of the tile in face-plane coordinates, each axis in `[-1, 1]`.
    #[must_use]
    pub fn patch_center(&self) -> DVec2 {
        let size = Self::grid_size(self.level) as f64;
        DVec2::new(
            -1.0 + (2 * self.x + 1) as f64 / size,
            -1.0 + (2 * self.y + 1) as f64 / size,
        )
    }

    /// Albedo tile path: `{base}/{level}_{side}_{x}_{y}.png`.
    #[must_use]
    pub fn albedo_path(&self, base: &Path) -> PathBuf {
        base.join(format!("{}.png", self.file_stem()))
    }

    /// Elevation tile path: `{base}/elevation/e_{level}_{side}_{x}_{y}.png`.
    #[must_use]
    pub fn elevation_path(&self, base: &Path) -> PathBuf {
        base.join("elevation")
            .join(format!("e_{}.png", self.file_stem()))
    }

    fn file_stem(&self) -> String {
        format!("{}_{}_{}_{}", self.level, self.face.index(), self.x, self.y)
    }
}

/// `(dx, dy)` tile offset of a child quadrant.
#[must_use]
pub fn quadrant_offset(quadrant: usize) -> (u32, u32) {
    ((quadrant & 1) as u32, (quadrant >> 1) as u32)
}

impl std::fmt::Display for TileAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({:?}, level={}, x={}, y={})",
            self.face, self.level, self.x, self.y
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_doubles_per_level() {
        assert_eq!(TileAddress::grid_size(1), 1);
        assert_eq!(TileAddress::grid_size(2), 2);
        assert_eq!(TileAddress::grid_size(6), 32);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_level_zero_is_invalid() {
        let _ = TileAddress::grid_size(0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_invalid_coordinates_panic() {
        let _ = TileAddress::new(CubeFace::PosX, 3, 4, 0);
    }

    #[test]
    fn test_children_double_coordinates() {
        let parent = TileAddress::new(CubeFace::NegY, 3, 1, 2);
        let children = parent.children().expect("level 3 has children");
        assert_eq!(children[0], TileAddress::new(CubeFace::NegY, 4, 2, 4));
        assert_eq!(children[1], TileAddress::new(CubeFace::NegY, 4, 3, 4));
        assert_eq!(children[2], TileAddress::new(CubeFace::NegY, 4, 2, 5));
        assert_eq!(children[3], TileAddress::new(CubeFace::NegY, 4, 3, 5));
        for child in children {
            assert_eq!(child.parent(), Some(parent));
        }
    }

    #[test]
    fn test_root_has_no_parent() {
        assert!(TileAddress::root(CubeFace::PosZ).parent().is_none());
    }

    #[test]
    fn test_max_level_has_no_children() {
        let addr = TileAddress::new(CubeFace::PosX, TileAddress::MAX_LEVEL, 0, 0);
        assert!(addr.children().is_none());
    }

    #[test]
    fn test_patch_center() {
        let root = TileAddress::root(CubeFace::PosX);
        assert_eq!(root.patch_center(), DVec2::ZERO);

        let corner = TileAddress::new(CubeFace::PosX, 2, 0, 1);
        assert!((corner.patch_center() - DVec2::new(-0.5, 0.5)).length() < 1e-12);

        let deep = TileAddress::new(CubeFace::PosX, 3, 3, 0);
        assert!((deep.patch_center() - DVec2::new(0.75, -0.75)).length() < 1e-12);
    }

    #[test]
    fn test_tile_paths_match_pyramid_layout() {
        let base = Path::new("/data/earth");
        let addr = TileAddress::new(CubeFace::NegZ, 3, 2, 1);
        assert_eq!(
            addr.albedo_path(base),
            PathBuf::from("/data/earth/3_5_2_1.png")
        );
        assert_eq!(
            addr.elevation_path(base),
            PathBuf::from("/data/earth/elevation/e_3_5_2_1.png")
        );
    }

    #[test]
    fn test_display() {
        let s = TileAddress::new(CubeFace::PosY, 2, 1, 0).to_string();
        assert!(s.contains("PosY"));
        assert!(s.contains("level=2"));
    }
}
