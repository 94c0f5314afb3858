//! Quantized (azimuth, elevation) keys for HRTF-style tables
//!
//! Orientations are compared at a 0.01 degree resolution. Keys store
//! rounded centidegrees so that equality and hashing agree, and so that a
//! lookup at an exact table key always returns that entry.

use serde::{Deserialize, Serialize};

/// Angular resolution used for orientation equality, in degrees
pub const ORIENTATION_RESOLUTION: f64 = 0.01;

/// Azimuth/elevation pair normalized to the table ranges:
/// azimuth in [0, 360), elevation in [0, 90] U [270, 360)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Orientation {
    azimuth_centi: i32,
    elevation_centi: i32,
}

impl Orientation {
    pub fn new(azimuth_degrees: f32, elevation_degrees: f32) -> Self {
        let azimuth = azimuth_to_0_360(azimuth_degrees);
        let elevation = elevation_to_0_90_270_360(elevation_degrees);
        Self {
            azimuth_centi: to_centi(azimuth),
            elevation_centi: to_centi(elevation),
        }
    }

    pub fn azimuth(&self) -> f32 {
        self.azimuth_centi as f32 * ORIENTATION_RESOLUTION as f32
    }

    pub fn elevation(&self) -> f32 {
        self.elevation_centi as f32 * ORIENTATION_RESOLUTION as f32
    }
}

fn to_centi(degrees: f32) -> i32 {
    let centi = (degrees as f64 / ORIENTATION_RESOLUTION).round() as i32;
    // 360.00 rounds back onto 0.00
    if centi == 36_000 {
        0
    } else {
        centi
    }
}

/// Map an azimuth to [0, 360)
pub fn azimuth_to_0_360(azimuth: f32) -> f32 {
    let azimuth = azimuth.rem_euclid(360.0);
    if azimuth == 360.0 {
        0.0
    } else {
        azimuth
    }
}

/// Map an azimuth to [-180, 180)
pub fn azimuth_to_plus_minus_180(azimuth: f32) -> f32 {
    let azimuth = azimuth_to_0_360(azimuth);
    if azimuth >= 180.0 {
        azimuth - 360.0
    } else {
        azimuth
    }
}

/// Map an elevation from [-90, 90] to [0, 90] U [270, 360)
pub fn elevation_to_0_90_270_360(elevation: f32) -> f32 {
    let elevation = elevation.rem_euclid(360.0);
    if elevation == 360.0 {
        0.0
    } else {
        elevation
    }
}

/// Map an elevation from [0, 90] U [270, 360) back to [-90, 90]
pub fn elevation_to_plus_minus_90(elevation: f32) -> f32 {
    if elevation >= 270.0 {
        elevation - 360.0
    } else {
        elevation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_azimuth_wrapping() {
        assert_eq!(azimuth_to_0_360(-90.0), 270.0);
        assert_eq!(azimuth_to_0_360(360.0), 0.0);
        assert_eq!(azimuth_to_0_360(725.0), 5.0);
        assert_eq!(azimuth_to_plus_minus_180(270.0), -90.0);
    }

    #[test]
    fn test_elevation_ranges() {
        assert_eq!(elevation_to_0_90_270_360(-45.0), 315.0);
        assert_eq!(elevation_to_0_90_270_360(90.0), 90.0);
        assert_eq!(elevation_to_plus_minus_90(315.0), -45.0);
        assert_eq!(elevation_to_plus_minus_90(90.0), 90.0);
    }

    #[test]
    fn test_normalize_then_lookup_is_stable() {
        // Normalizing twice must land on the same key as normalizing once.
        let once = Orientation::new(-90.0, -45.0);
        let twice = Orientation::new(once.azimuth(), once.elevation());
        assert_eq!(once, twice);
        assert_eq!(once.azimuth(), 270.0);
        assert_eq!(once.elevation(), 315.0);
    }

    #[test]
    fn test_resolution() {
        // Differences below the resolution collapse onto the same key
        let a = Orientation::new(10.001, 0.0);
        let b = Orientation::new(10.004, 0.0);
        assert_eq!(a, b);

        let c = Orientation::new(10.0, 0.0);
        let d = Orientation::new(10.01, 0.0);
        assert_ne!(c, d);
    }
}
