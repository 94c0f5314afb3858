//! Quasi-uniform sphere grid
//!
//! The sphere is striped into rings of near-constant elevation step; on
//! each ring the azimuth step grows as 1/cos(elevation) so cells keep
//! approximately equal area. The per-ring azimuth step is kept in a side
//! map so lookups can snap a query onto the grid without searching.

use std::collections::HashMap;

use resona_core::{
    azimuth_to_0_360, elevation_to_0_90_270_360, elevation_to_plus_minus_90, Orientation,
};

/// Default grid sampling step in degrees
pub const DEFAULT_GRID_STEP: u32 = 5;

/// Elevation step plus the azimuth step of every ring
#[derive(Debug, Clone, Default)]
pub struct StepMap {
    pub elevation_step: f32,
    /// Keyed by ring elevation in centidegrees (normalized range)
    azimuth_steps: HashMap<i32, f32>,
}

impl StepMap {
    fn ring_key(elevation: f32) -> i32 {
        (elevation as f64 / 0.01).round() as i32
    }

    fn insert(&mut self, ring_elevation: f32, azimuth_step: f32) {
        self.azimuth_steps
            .insert(Self::ring_key(ring_elevation), azimuth_step);
    }

    /// Azimuth step of the ring at `ring_elevation` (a normalized grid
    /// elevation)
    pub fn azimuth_step(&self, ring_elevation: f32) -> Option<f32> {
        self.azimuth_steps.get(&Self::ring_key(ring_elevation)).copied()
    }

    /// Snap an elevation to the nearest ring, in normalized range
    pub fn nearest_ring(&self, elevation: f32) -> f32 {
        let signed = elevation_to_plus_minus_90(azimuth_to_0_360(elevation));
        let ring = (signed / self.elevation_step).round() * self.elevation_step;
        elevation_to_0_90_270_360(ring.clamp(-90.0, 90.0))
    }

    /// The rings just below and above an elevation, in normalized range.
    /// At the poles both rings coincide.
    pub fn rings_around(&self, elevation: f32) -> (f32, f32) {
        let signed = elevation_to_plus_minus_90(azimuth_to_0_360(elevation));
        let below = ((signed / self.elevation_step).floor() * self.elevation_step).max(-90.0);
        let above = (below + self.elevation_step).min(90.0);
        (
            elevation_to_0_90_270_360(below),
            elevation_to_0_90_270_360(above),
        )
    }
}

/// Build the grid orientations and the step map for a sampling step in
/// degrees.
pub fn build_grid(grid_step: u32) -> (Vec<Orientation>, StepMap) {
    let mut orientations = Vec::new();
    let mut step_map = StepMap::default();

    let rings_per_hemisphere = (90.0 / grid_step as f32).ceil() as i32;
    let elevation_step = 90.0 / rings_per_hemisphere as f32;
    step_map.elevation_step = elevation_step;

    let azimuth_divisions = (360.0 / grid_step as f32).ceil();

    for ring in -rings_per_hemisphere..=rings_per_hemisphere {
        let elevation_signed = ring as f32 * elevation_step;
        let divisions = azimuth_divisions * elevation_signed.to_radians().cos();
        let divisions = (divisions.ceil() as i32).max(1);
        let azimuth_step = 360.0 / divisions as f32;

        let ring_elevation = elevation_to_0_90_270_360(elevation_signed);
        step_map.insert(ring_elevation, azimuth_step);

        for division in 0..divisions {
            let azimuth = division as f32 * azimuth_step;
            orientations.push(Orientation::new(azimuth, ring_elevation));
        }
    }

    (orientations, step_map)
}

/// Snap a query direction onto its nearest grid orientation
pub fn nearest_orientation(step_map: &StepMap, azimuth: f32, elevation: f32) -> Orientation {
    let ring = step_map.nearest_ring(elevation);
    grid_orientation(step_map, azimuth, ring, |ratio| ratio.round())
}

/// Grid vertex on the ring `ring_elevation` obtained by rounding the
/// azimuth with `snap` (round / floor / ceil over azimuth-step units)
pub fn grid_orientation(
    step_map: &StepMap,
    azimuth: f32,
    ring_elevation: f32,
    snap: impl Fn(f32) -> f32,
) -> Orientation {
    // Poles hold a single entry at azimuth 0
    if is_pole(ring_elevation) {
        return Orientation::new(0.0, ring_elevation);
    }
    let Some(azimuth_step) = step_map.azimuth_step(ring_elevation) else {
        return Orientation::new(azimuth, ring_elevation);
    };
    let snapped = snap(azimuth_to_0_360(azimuth) / azimuth_step) * azimuth_step;
    Orientation::new(azimuth_to_0_360(snapped), ring_elevation)
}

/// True for the north (90) and south (270) pole rings
pub fn is_pole(elevation: f32) -> bool {
    let signed = elevation_to_plus_minus_90(elevation);
    (signed.abs() - 90.0).abs() < 1e-3
}
