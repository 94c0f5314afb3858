//! Near-field compensation filter service
//!
//! Measured HRTFs assume a far-field source; a source closer than the
//! measurement sphere gets a low-frequency interaural boost that the far
//! field misses. This service stores second-order-section coefficients
//! (two biquad stages of {b0,b1,b2,a0,a1,a2} per ear) indexed by distance
//! and interaural azimuth, and hands out bilinearly interpolated sets at
//! query time. Beyond the reference distance the compensation is
//! bypassed.

use std::collections::HashMap;

use resona_core::{
    record_error, CoreError, CoreResult, Ear, EarPair, GlobalConfig, DISTANCE_THRESHOLD_NEAR,
};

/// Coefficients per ear and table cell: two stages of six
pub const COEFFICIENTS_PER_EAR: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceState {
    Empty,
    Loading,
    Ready,
}

fn quantize(value: f32) -> i32 {
    (value as f64 * 100.0).round() as i32
}

/// Table of near-field second-order-section coefficients
pub struct SosFilterService {
    #[allow(dead_code)]
    config: GlobalConfig,
    state: ServiceState,
    /// Keyed by (distance, interaural azimuth) in centi-units
    table: HashMap<(i32, i32), EarPair<Vec<f32>>>,
    distances: Vec<f32>,
    azimuths: Vec<f32>,
}

impl SosFilterService {
    pub fn new(config: GlobalConfig) -> Self {
        Self {
            config,
            state: ServiceState::Empty,
            table: HashMap::new(),
            distances: Vec::new(),
            azimuths: Vec::new(),
        }
    }

    pub fn begin_setup(&mut self) -> CoreResult<()> {
        self.table.clear();
        self.distances.clear();
        self.azimuths.clear();
        self.state = ServiceState::Loading;
        Ok(())
    }

    /// Add the coefficient pair measured at (distance, interaural
    /// azimuth). Each ear needs exactly twelve coefficients.
    pub fn add_coefficients(
        &mut self,
        distance: f32,
        interaural_azimuth: f32,
        coefficients: EarPair<Vec<f32>>,
    ) -> bool {
        if self.state != ServiceState::Loading {
            record_error(CoreError::NotAllowed(
                "add_coefficients requires begin_setup first".into(),
            ));
            return false;
        }
        if coefficients.left.len() != COEFFICIENTS_PER_EAR
            || coefficients.right.len() != COEFFICIENTS_PER_EAR
        {
            record_error(CoreError::BadSize(format!(
                "near-field entry at ({distance}, {interaural_azimuth}) needs {COEFFICIENTS_PER_EAR} coefficients per ear"
            )));
            return false;
        }
        if distance <= 0.0 {
            record_error(CoreError::OutOfRange(
                "near-field entry distance must be positive".into(),
            ));
            return false;
        }
        self.table.insert(
            (quantize(distance), quantize(interaural_azimuth)),
            coefficients,
        );
        true
    }

    /// Freeze the table. Fails on an empty table, leaving the service
    /// empty.
    pub fn end_setup(&mut self) -> CoreResult<()> {
        if self.state != ServiceState::Loading {
            let error = CoreError::NotAllowed("end_setup requires begin_setup first".into());
            record_error(error.clone());
            return Err(error);
        }
        if self.table.is_empty() {
            let error =
                CoreError::NotInitialized("end_setup with no near-field coefficients".into());
            record_error(error.clone());
            self.state = ServiceState::Empty;
            return Err(error);
        }

        let mut distances: Vec<i32> = self.table.keys().map(|&(d, _)| d).collect();
        distances.sort_unstable();
        distances.dedup();
        self.distances = distances.into_iter().map(|d| d as f32 / 100.0).collect();

        let mut azimuths: Vec<i32> = self.table.keys().map(|&(_, a)| a).collect();
        azimuths.sort_unstable();
        azimuths.dedup();
        self.azimuths = azimuths.into_iter().map(|a| a as f32 / 100.0).collect();

        self.state = ServiceState::Ready;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.state == ServiceState::Ready
    }

    /// Twelve filter coefficients for one ear at (distance, interaural
    /// azimuth), bilinearly interpolated over the two table axes.
    /// Returns `None` beyond the near-field threshold (bypass) or before
    /// setup completes.
    pub fn coefficients(
        &self,
        ear: Ear,
        distance: f32,
        interaural_azimuth: f32,
    ) -> Option<Vec<f32>> {
        if !self.is_ready() {
            record_error(CoreError::NotInitialized(
                "near-field coefficients queried before end_setup".into(),
            ));
            return None;
        }
        if distance >= DISTANCE_THRESHOLD_NEAR {
            return None;
        }

        let (d0, d1, dt) = bracket(&self.distances, distance);
        let (a0, a1, at) = bracket(&self.azimuths, interaural_azimuth);

        let corner = |d: f32, a: f32| -> Option<&EarPair<Vec<f32>>> {
            self.table.get(&(quantize(d), quantize(a)))
        };
        let (c00, c01, c10, c11) = (
            corner(d0, a0)?,
            corner(d0, a1)?,
            corner(d1, a0)?,
            corner(d1, a1)?,
        );

        let mut result = Vec::with_capacity(COEFFICIENTS_PER_EAR);
        for index in 0..COEFFICIENTS_PER_EAR {
            let low = lerp(c00.get(ear)[index], c01.get(ear)[index], at);
            let high = lerp(c10.get(ear)[index], c11.get(ear)[index], at);
            result.push(lerp(low, high, dt));
        }
        Some(result)
    }
}

/// Bracketing values of `value` in a sorted axis, with the interpolation
/// fraction. Clamps at both ends.
fn bracket(axis: &[f32], value: f32) -> (f32, f32, f32) {
    match axis.iter().position(|&edge| edge >= value) {
        Some(0) => (axis[0], axis[0], 0.0),
        Some(upper) => {
            let low = axis[upper - 1];
            let high = axis[upper];
            let t = if high > low {
                (value - low) / (high - low)
            } else {
                0.0
            };
            (low, high, t)
        }
        None => {
            let last = *axis.last().expect("axis is non-empty after end_setup");
            (last, last, 0.0)
        }
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_coefficients(gain: f32) -> Vec<f32> {
        // First stage is a pure gain, second stage the identity
        vec![
            gain, 0.0, 0.0, 1.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, 1.0, 0.0, 0.0,
        ]
    }

    fn loaded_service() -> SosFilterService {
        let mut service = SosFilterService::new(GlobalConfig::default());
        service.begin_setup().unwrap();
        for &distance in &[0.5f32, 1.0, 1.5] {
            for &azimuth in &[-90.0f32, 0.0, 90.0] {
                // Encode the cell position in the gain so interpolation is
                // observable
                let gain = distance + azimuth / 1000.0;
                service.add_coefficients(
                    distance,
                    azimuth,
                    EarPair::new(identity_coefficients(gain), identity_coefficients(-gain)),
                );
            }
        }
        service.end_setup().unwrap();
        service
    }

    #[test]
    fn test_lifecycle() {
        let mut service = SosFilterService::new(GlobalConfig::default());
        assert!(!service.add_coefficients(
            1.0,
            0.0,
            EarPair::new(identity_coefficients(1.0), identity_coefficients(1.0))
        ));
        service.begin_setup().unwrap();
        assert!(service.end_setup().is_err());
        assert!(!service.is_ready());
    }

    #[test]
    fn test_exact_cell_lookup() {
        let service = loaded_service();
        let coefficients = service.coefficients(Ear::Left, 1.0, 0.0).unwrap();
        assert!((coefficients[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_bilinear_interpolation() {
        let service = loaded_service();
        // Halfway between distances 1.0 and 1.5 at azimuth 0
        let coefficients = service.coefficients(Ear::Left, 1.25, 0.0).unwrap();
        assert!((coefficients[0] - 1.25).abs() < 1e-5);

        // Halfway in both axes: the encoded gain is linear in both
        let coefficients = service.coefficients(Ear::Left, 1.25, 45.0).unwrap();
        assert!((coefficients[0] - 1.295).abs() < 1e-4);
    }

    #[test]
    fn test_far_field_bypass() {
        let service = loaded_service();
        assert!(service.coefficients(Ear::Left, 2.5, 0.0).is_none());
        assert!(service
            .coefficients(Ear::Left, DISTANCE_THRESHOLD_NEAR, 0.0)
            .is_none());
    }

    #[test]
    fn test_out_of_range_clamps() {
        let service = loaded_service();
        // Below the smallest measured distance: clamps to the first row
        let coefficients = service.coefficients(Ear::Left, 0.1, 0.0).unwrap();
        assert!((coefficients[0] - 0.5).abs() < 1e-6);
    }
}
