//! Global render configuration
//!
//! One `GlobalConfig` value is created by the host and threaded into every
//! service and processor at construction time. It is deliberately not a
//! process singleton: two renderers with different block sizes can coexist.

use serde::{Deserialize, Serialize};

/// Default sample rate in samples per second
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
/// Default audio block size in samples
pub const DEFAULT_BUFFER_SIZE: usize = 512;
/// Default anechoic attenuation with distance, in dB per distance doubling
/// (log10(0.5) * 20)
pub const DEFAULT_ANECHOIC_ATTENUATION_DB: f32 = -6.0206;
/// Default sound speed in m/s
pub const DEFAULT_SOUND_SPEED: f32 = 343.0;
/// Reference distance and near-field threshold, in meters
pub const DISTANCE_THRESHOLD_NEAR: f32 = 1.95;
/// Far-distance threshold, in meters
pub const DISTANCE_THRESHOLD_FAR: f32 = 15.0;
/// Default listener head radius in meters
pub const DEFAULT_HEAD_RADIUS: f32 = 0.0875;
/// Attack time for the gradual distance-attenuation ramp, in seconds
pub const ATTENUATION_ATTACK_SECONDS: f32 = 0.1;
/// Smoothing interval for propagation-delay changes, in seconds
pub const DELAY_SMOOTHING_SECONDS: f32 = 0.015;

/// Sample rate, block size and acoustic constants for one render context
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Sample rate in samples per second
    pub sample_rate: u32,
    /// Audio block size in samples
    pub buffer_size: usize,
    /// Anechoic attenuation with distance, in dB per doubling (must be <= 0)
    anechoic_attenuation_db: f32,
    /// Sound speed in m/s (must be > 0)
    sound_speed: f32,
    /// Distance at which the attenuation is 0 dB, in meters
    pub reference_distance: f32,
    /// Listener head radius in meters
    pub head_radius: f32,
}

impl GlobalConfig {
    pub fn new(sample_rate: u32, buffer_size: usize) -> Self {
        Self {
            sample_rate,
            buffer_size,
            ..Self::default()
        }
    }

    pub fn anechoic_attenuation_db(&self) -> f32 {
        self.anechoic_attenuation_db
    }

    /// Set the distance attenuation constant. Positive values are rejected
    /// and the previous value kept.
    pub fn set_anechoic_attenuation_db(&mut self, attenuation_db: f32) {
        if attenuation_db > 0.0 {
            log::warn!("distance attenuation must be a negative dB value, keeping {}", self.anechoic_attenuation_db);
            return;
        }
        self.anechoic_attenuation_db = attenuation_db;
    }

    pub fn sound_speed(&self) -> f32 {
        self.sound_speed
    }

    /// Set the sound speed. Non-positive values are rejected and the
    /// previous value kept.
    pub fn set_sound_speed(&mut self, sound_speed: f32) {
        if sound_speed <= 0.0 {
            log::warn!("sound speed must be positive, keeping {}", self.sound_speed);
            return;
        }
        self.sound_speed = sound_speed;
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            anechoic_attenuation_db: DEFAULT_ANECHOIC_ATTENUATION_DB,
            sound_speed: DEFAULT_SOUND_SPEED,
            reference_distance: DISTANCE_THRESHOLD_NEAR,
            head_radius: DEFAULT_HEAD_RADIUS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = GlobalConfig::default();
        config.set_anechoic_attenuation_db(3.0);
        assert_eq!(config.anechoic_attenuation_db(), DEFAULT_ANECHOIC_ATTENUATION_DB);

        config.set_sound_speed(-10.0);
        assert_eq!(config.sound_speed(), DEFAULT_SOUND_SPEED);

        config.set_sound_speed(340.0);
        assert_eq!(config.sound_speed(), 340.0);
    }
}
