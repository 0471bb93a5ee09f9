//! Scripted camera path: a descent from orbit towards the surface and back.

use glam::DVec3;

/// Camera moving along a fixed ray from the planet centre.
///
/// The first half of the path descends from `start_altitude` to
/// `end_altitude` (both in multiples of sea level), the second half climbs
/// back out so streamed tiles age and get evicted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DescentPath {
    direction: DVec3,
    sea_level: f64,
    start_altitude: f64,
    end_altitude: f64,
}

impl DescentPath {
    /// Path above `direction` (normalized here).
    pub fn new(direction: DVec3, sea_level: f64, start_altitude: f64, end_altitude: f64) -> Self {
        Self {
            direction: direction.normalize_or(DVec3::Z),
            sea_level,
            start_altitude,
            end_altitude,
        }
    }

    /// Default demo path over the +Z face, slightly off centre.
    pub fn demo(sea_level: f64) -> Self {
        Self::new(DVec3::new(0.15, 0.1, 1.0), sea_level, 8.0, 1.02)
    }

    /// Altitude, as a multiple of sea level, at progress `t` in `[0, 1]`.
    pub fn altitude(&self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        // Triangle wave: down for t < 0.5, up after.
        let leg = 1.0 - (2.0 * t - 1.0).abs();
        // Ease so more time is spent close to the ground.
        let eased = 1.0 - (1.0 - leg).powi(3);
        self.start_altitude + (self.end_altitude - self.start_altitude) * eased
    }

    /// Camera position at progress `t`.
    pub fn position(&self, t: f64) -> DVec3 {
        self.direction * self.altitude(t) * self.sea_level
    }
}
