//! Distance attenuation with a gradual gain ramp

use resona_core::{
    record_error, CoreError, GlobalConfig, SampleBuffer, Transform,
    ATTENUATION_ATTACK_SECONDS,
};

/// Reference attenuation slope: -6.0206 dB per distance doubling
/// (log10(0.5) * 20), i.e. the inverse-square law
pub const REFERENCE_ATTENUATION_DB: f32 = -6.0206;

const EPSILON_DISTANCE: f32 = 0.0001;
const EPSILON_ATTENUATION: f32 = 0.0001;

/// Applies inverse-distance gain, ramped exponentially across the block to
/// avoid discontinuities when the source moves.
#[derive(Debug, Clone)]
pub struct DistanceAttenuator {
    previous_gain: f32,
    enabled: bool,
}

impl DistanceAttenuator {
    pub fn new() -> Self {
        Self {
            previous_gain: 0.0,
            enabled: true,
        }
    }

    pub fn enable_processor(&mut self) {
        self.enabled = true;
    }

    pub fn disable_processor(&mut self) {
        self.enabled = false;
    }

    pub fn is_processor_enabled(&self) -> bool {
        self.enabled
    }

    /// Attenuate `input` into `output` according to the source/listener
    /// distance and the configured dB-per-doubling slope.
    pub fn process(
        &mut self,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
        source_transform: &Transform,
        listener_transform: &Transform,
        config: &GlobalConfig,
    ) {
        debug_assert_eq!(input.len(), config.buffer_size, "buffer size mismatch");
        *output = input.clone();

        if !self.enabled {
            return;
        }

        let distance = listener_transform
            .vector_to(source_transform)
            .magnitude();
        let gain = Self::distance_gain(
            config.anechoic_attenuation_db(),
            distance,
            config.reference_distance,
        );

        output.apply_gain_exponential(
            &mut self.previous_gain,
            gain,
            ATTENUATION_ATTACK_SECONDS,
            config.sample_rate,
        );
    }

    /// Gain for a given distance:
    /// `10 ^ (factor * log10(reference / distance))` where
    /// `factor = attenuation_db / -6.0206`.
    pub fn distance_gain(attenuation_db: f32, distance: f32, reference_distance: f32) -> f32 {
        if distance <= 0.0 {
            record_error(CoreError::DivByZero(
                "distance attenuation for a non-positive distance".into(),
            ));
            return 1.0;
        }
        if distance > EPSILON_DISTANCE && attenuation_db.abs() > EPSILON_ATTENUATION {
            let factor = attenuation_db / REFERENCE_ATTENUATION_DB;
            10.0f32.powf(factor * (reference_distance / distance).log10())
        } else {
            1.0
        }
    }

    /// Forget the ramp state (next block ramps in from silence)
    pub fn reset(&mut self) {
        self.previous_gain = 0.0;
    }
}

impl Default for DistanceAttenuator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use resona_core::Vector3;

    #[test]
    fn test_inverse_square_gain() {
        // At the reference distance the gain is unity
        assert_relative_eq!(
            DistanceAttenuator::distance_gain(REFERENCE_ATTENUATION_DB, 1.95, 1.95),
            1.0
        );
        // Doubling the distance halves the amplitude
        assert_relative_eq!(
            DistanceAttenuator::distance_gain(REFERENCE_ATTENUATION_DB, 3.9, 1.95),
            0.5,
            epsilon = 1e-4
        );
        // One meter with the 1.95 m reference boosts by ~1.95x
        assert_relative_eq!(
            DistanceAttenuator::distance_gain(REFERENCE_ATTENUATION_DB, 1.0, 1.95),
            1.95,
            epsilon = 1e-3
        );
    }

    #[test]
    fn test_non_positive_distance_is_unity() {
        assert_eq!(
            DistanceAttenuator::distance_gain(REFERENCE_ATTENUATION_DB, 0.0, 1.95),
            1.0
        );
    }

    #[test]
    fn test_gain_settles_on_target() {
        let config = GlobalConfig::new(48_000, 128);
        let mut attenuator = DistanceAttenuator::new();
        let listener = Transform::from_position(Vector3::ZERO);
        let source = Transform::from_position(Vector3::new(3.9, 0.0, 0.0));

        let input = SampleBuffer::from_samples(vec![1.0; config.buffer_size]);
        let mut output = SampleBuffer::new(config.buffer_size);

        // Run enough blocks for the 100 ms attack to converge
        for _ in 0..80 {
            attenuator.process(&input, &mut output, &source, &listener, &config);
        }
        let last = output[config.buffer_size - 1];
        assert_relative_eq!(last, 0.5, epsilon = 1e-3);
    }
}
