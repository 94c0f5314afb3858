//! Angular distance and barycentric helpers for HRIR interpolation

use resona_core::Orientation;

/// Degenerate-triangle guard for the barycentric denominator
pub const EPSILON_SEWING: f32 = 0.001;

/// Barycentric coordinates of a query point in a planar triangle chart
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarycentricWeights {
    pub alpha: f32,
    pub beta: f32,
    pub gamma: f32,
}

impl BarycentricWeights {
    /// True when the query point lies inside (or on) the triangle
    pub fn is_inside(&self) -> bool {
        self.alpha >= 0.0 && self.beta >= 0.0 && self.gamma >= 0.0
    }
}

/// Truncate to milli-precision, matching the table resolution
fn truncate_milli(value: f32) -> f32 {
    (value * 1000.0).trunc() / 1000.0
}

/// Barycentric coordinates of (x, y) in the triangle (x1,y1) (x2,y2)
/// (x3,y3). Returns `None` for a degenerate triangle.
pub fn barycentric_weights(
    x: f32,
    y: f32,
    (x1, y1): (f32, f32),
    (x2, y2): (f32, f32),
    (x3, y3): (f32, f32),
) -> Option<BarycentricWeights> {
    let denominator = (y2 - y3) * (x1 - x3) + (x3 - x2) * (y1 - y3);
    if denominator.abs() < EPSILON_SEWING {
        return None;
    }

    let alpha = truncate_milli(((y2 - y3) * (x - x3) + (x3 - x2) * (y - y3)) / denominator);
    let beta = truncate_milli(((y3 - y1) * (x - x3) + (x1 - x3) * (y - y3)) / denominator);
    let gamma = truncate_milli(1.0 - alpha - beta);
    Some(BarycentricWeights { alpha, beta, gamma })
}

/// Angular distance between two (azimuth, elevation) points in degrees,
/// by the haversine formula. The result is a monotonic distance measure
/// (half the central angle, in radians).
pub fn haversine_distance(
    azimuth1: f32,
    elevation1: f32,
    azimuth2: f32,
    elevation2: f32,
) -> f32 {
    let delta_azimuth = (azimuth1 - azimuth2).to_radians();
    let delta_elevation = (elevation1 - elevation2).to_radians();

    let term1 = (delta_elevation / 2.0).sin().powi(2);
    let term2 = elevation1.to_radians().cos();
    let term3 = elevation2.to_radians().cos();
    let term4 = (delta_azimuth / 2.0).sin().powi(2);

    let root = (term1 + term2 * term3 * term4).max(0.0);
    root.sqrt().clamp(-1.0, 1.0).asin()
}

/// Orientations sorted by angular distance to a query point
pub fn orientations_by_distance(
    orientations: impl IntoIterator<Item = Orientation>,
    azimuth: f32,
    elevation: f32,
) -> Vec<(f32, Orientation)> {
    let mut sorted: Vec<(f32, Orientation)> = orientations
        .into_iter()
        .map(|orientation| {
            (
                haversine_distance(
                    azimuth,
                    elevation,
                    orientation.azimuth(),
                    orientation.elevation(),
                ),
                orientation,
            )
        })
        .collect();
    sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    sorted
}

/// Shift a vertex azimuth into the chart of a query azimuth so the
/// planar barycentric computation never spans the 0/360 seam.
pub fn unwrap_azimuth(query_azimuth: f32, vertex_azimuth: f32) -> f32 {
    let mut azimuth = vertex_azimuth;
    if azimuth - query_azimuth > 180.0 {
        azimuth -= 360.0;
    } else if azimuth - query_azimuth < -180.0 {
        azimuth += 360.0;
    }
    azimuth
}
