//! Filling the unmeasured regions of an HRIR grid
//!
//! Many measured HRTF sets stop short of the poles (no loudspeaker below
//! the listener) or cover only a frontal azimuth wedge. Before the sphere
//! grid is resampled, gaps wider than twice the empirical average step are
//! filled, either with silence or with the angularly-closest measured
//! response.

use std::collections::HashMap;

use resona_core::{
    azimuth_to_0_360, azimuth_to_plus_minus_180, elevation_to_0_90_270_360,
    elevation_to_plus_minus_90, Orientation,
};

use super::interpolation::haversine_distance;
use super::HrirRecord;

/// Strategy for synthesising HRIRs in uncovered regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtrapolationMethod {
    /// Insert zero impulse responses
    ZeroInsertion,
    /// Copy the angularly-closest measured response
    #[default]
    NearestPoint,
}

#[derive(Debug, Default)]
struct Borders {
    max_azimuth: f32,
    min_azimuth: f32,
    max_elevation: f32,
    min_elevation: f32,
}

#[derive(Debug, Default)]
struct Gaps {
    max_elevation: bool,
    min_elevation: bool,
    max_azimuth: bool,
    min_azimuth: bool,
}

impl Gaps {
    fn any(&self) -> bool {
        self.max_elevation || self.min_elevation || self.max_azimuth || self.min_azimuth
    }
}

/// Detect polar caps and azimuth wedges without measurements and fill
/// them with `method`, stepping by `step_degrees`.
pub fn extrapolate(
    table: &mut HashMap<Orientation, HrirRecord>,
    method: ExtrapolationMethod,
    step_degrees: u32,
) {
    if table.is_empty() {
        return;
    }

    let average_step = 360.0 / ((table.len() as f32) * std::f32::consts::PI).sqrt();
    let borders = find_borders(table);
    let gaps = find_gaps(&borders, average_step);
    if !gaps.any() {
        return;
    }

    log::debug!(
        "extrapolating HRIR grid ({method:?}): elevation borders [{:.1}, {:.1}], azimuth borders [{:.1}, {:.1}]",
        borders.min_elevation,
        borders.max_elevation,
        borders.min_azimuth,
        borders.max_azimuth
    );

    // Snapshot of the measured orientations for nearest-point lookups
    let measured: Vec<Orientation> = table.keys().copied().collect();
    let zero_record = {
        let ir_length = table
            .values()
            .next()
            .map(|record| record.left.len())
            .unwrap_or_default();
        HrirRecord::new(vec![0.0; ir_length], vec![0.0; ir_length])
    };

    let step = step_degrees.max(1) as f32;
    let mut fill = |azimuth: f32, elevation_signed: f32| {
        let key = Orientation::new(azimuth, elevation_to_0_90_270_360(elevation_signed));
        if table.contains_key(&key) {
            return;
        }
        let record = match method {
            ExtrapolationMethod::ZeroInsertion => zero_record.clone(),
            ExtrapolationMethod::NearestPoint => {
                nearest_record(table, &measured, key.azimuth(), key.elevation())
                    .unwrap_or_else(|| zero_record.clone())
            }
        };
        table.insert(key, record);
    };

    if gaps.max_elevation {
        let mut elevation = 90.0;
        while elevation > borders.max_elevation + step {
            let mut azimuth = 0.0;
            while azimuth < 360.0 {
                fill(azimuth, elevation);
                azimuth += step;
            }
            elevation -= step;
        }
    }
    if gaps.min_elevation {
        let mut elevation = -90.0;
        while elevation < borders.min_elevation - step {
            let mut azimuth = 0.0;
            while azimuth < 360.0 {
                fill(azimuth, elevation);
                azimuth += step;
            }
            elevation += step;
        }
    }
    if gaps.max_azimuth {
        let mut elevation = borders.min_elevation;
        while elevation < borders.max_elevation {
            let mut azimuth = borders.max_azimuth + step;
            while azimuth <= 180.0 {
                fill(azimuth_to_0_360(azimuth), elevation);
                azimuth += step;
            }
            elevation += step;
        }
    }
    if gaps.min_azimuth {
        let mut elevation = borders.min_elevation;
        while elevation < borders.max_elevation {
            let mut azimuth = borders.min_azimuth - step;
            while azimuth >= -180.0 {
                fill(azimuth_to_0_360(azimuth), elevation);
                azimuth -= step;
            }
            elevation += step;
        }
    }
}

/// Extent of the measured region, in signed azimuth/elevation ranges
fn find_borders(table: &HashMap<Orientation, HrirRecord>) -> Borders {
    let mut borders = Borders {
        max_azimuth: -180.0,
        min_azimuth: 180.0,
        max_elevation: -90.0,
        min_elevation: 90.0,
    };
    for orientation in table.keys() {
        let azimuth = azimuth_to_plus_minus_180(orientation.azimuth());
        let elevation = elevation_to_plus_minus_90(orientation.elevation());
        borders.max_azimuth = borders.max_azimuth.max(azimuth);
        borders.min_azimuth = borders.min_azimuth.min(azimuth);
        borders.max_elevation = borders.max_elevation.max(elevation);
        borders.min_elevation = borders.min_elevation.min(elevation);
    }
    borders
}

fn find_gaps(borders: &Borders, average_step: f32) -> Gaps {
    Gaps {
        max_elevation: (90.0 - borders.max_elevation) > 2.0 * average_step,
        min_elevation: (90.0 + borders.min_elevation) > 2.0 * average_step,
        max_azimuth: (180.0 - borders.max_azimuth) > 2.0 * average_step,
        min_azimuth: (180.0 + borders.min_azimuth) > 2.0 * average_step,
    }
}

fn nearest_record(
    table: &HashMap<Orientation, HrirRecord>,
    measured: &[Orientation],
    azimuth: f32,
    elevation: f32,
) -> Option<HrirRecord> {
    let nearest = measured.iter().min_by(|a, b| {
        let da = haversine_distance(azimuth, elevation, a.azimuth(), a.elevation());
        let db = haversine_distance(azimuth, elevation, b.azimuth(), b.elevation());
        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
    })?;
    table.get(nearest).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn horizontal_ring_table() -> HashMap<Orientation, HrirRecord> {
        // Measurements on the horizontal ring only: both polar caps are
        // unmeasured.
        let mut table = HashMap::new();
        let mut azimuth = 0.0;
        while azimuth < 360.0 {
            table.insert(
                Orientation::new(azimuth, 0.0),
                HrirRecord::new(vec![azimuth; 4], vec![azimuth; 4]),
            );
            azimuth += 10.0;
        }
        table
    }

    #[test]
    fn test_polar_caps_are_filled() {
        let mut table = horizontal_ring_table();
        let before = table.len();
        extrapolate(&mut table, ExtrapolationMethod::ZeroInsertion, 10);
        assert!(table.len() > before);

        // Some high-elevation orientation now exists and is silent
        let filled = table
            .iter()
            .find(|(orientation, _)| orientation.elevation() == 80.0)
            .expect("polar cap should have been filled");
        assert!(filled.1.left.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_nearest_point_copies_neighbours() {
        let mut table = horizontal_ring_table();
        extrapolate(&mut table, ExtrapolationMethod::NearestPoint, 10);

        // A filled cap entry above azimuth 90 copies the ring entry at 90
        let filled = table
            .get(&Orientation::new(90.0, 30.0))
            .expect("cap entry should exist");
        assert_eq!(filled.left[0], 90.0);
    }

    #[test]
    fn test_full_sphere_needs_no_extrapolation() {
        let mut table = HashMap::new();
        let mut elevation = -90.0f32;
        while elevation <= 90.0 {
            let mut azimuth = 0.0;
            while azimuth < 360.0 {
                table.insert(
                    Orientation::new(azimuth, elevation),
                    HrirRecord::new(vec![1.0; 4], vec![1.0; 4]),
                );
                azimuth += 15.0;
            }
            elevation += 15.0;
        }
        let before = table.len();
        extrapolate(&mut table, ExtrapolationMethod::ZeroInsertion, 15);
        assert_eq!(table.len(), before);
    }
}
