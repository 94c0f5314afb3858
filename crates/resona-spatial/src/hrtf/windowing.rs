//! Raised-cosine fade windows for impulse responses
//!
//! Measured HRIRs can carry pre-ringing before the true onset and noise in
//! the decaying tail; a fade-in and a fade-out window clean both ends.
//! Windows are parameterised by (threshold, rise) in seconds: the window
//! midpoint sits at the threshold and the raised cosine spans the rise
//! time.

use serde::{Deserialize, Serialize};

/// Fade-in / fade-out parameters, in seconds at the service sample rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowingConfig {
    pub fade_in_threshold: f32,
    pub fade_in_rise: f32,
    pub fade_out_threshold: f32,
    pub fade_out_rise: f32,
}

/// Zero the pre-onset region and raise the signal with a half-cosine
pub fn fade_in_window(ir: &[f32], threshold: f32, rise: f32, sample_rate: f32) -> Vec<f32> {
    let zeros = (((threshold - rise / 2.0) * sample_rate).floor()).max(0.0) as usize;
    let fade = ((rise * sample_rate).ceil()).max(0.0) as usize;

    if zeros >= ir.len() {
        log::warn!("fade-in window is longer than the impulse response, skipping");
        return ir.to_vec();
    }

    let mut windowed = vec![0.0; zeros];
    windowed.reserve(ir.len());
    let fade_end = (zeros + fade).min(ir.len());
    for i in zeros..fade_end {
        let phase = std::f32::consts::PI * (i - zeros) as f32 / fade as f32;
        windowed.push(ir[i] * 0.5 * (1.0 - phase.cos()));
    }
    windowed.extend_from_slice(&ir[fade_end..]);
    windowed
}

/// Keep the head of the response, roll the tail off with a half-cosine
/// and drop the remainder.
pub fn fade_out_window(ir: &[f32], threshold: f32, rise: f32, sample_rate: f32) -> Vec<f32> {
    let ones = (((threshold - rise / 2.0) * sample_rate).floor()).max(0.0) as usize;
    let fade = ((rise * sample_rate).ceil()).max(0.0) as usize;

    if ones >= ir.len() {
        log::warn!("fade-out window is longer than the impulse response, skipping");
        return ir.to_vec();
    }

    let mut windowed = Vec::with_capacity(ir.len());
    windowed.extend_from_slice(&ir[..ones]);
    let fade_end = (ones + fade).min(ir.len());
    for i in ones..fade_end {
        let phase = std::f32::consts::PI * (i - ones) as f32 / fade as f32;
        windowed.push(ir[i] * 0.5 * (1.0 + phase.cos()));
    }
    windowed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fade_in_zeroes_the_head() {
        let ir = vec![1.0; 100];
        // Threshold 10 samples, rise 4 samples at fs = 1000 Hz
        let windowed = fade_in_window(&ir, 0.010, 0.004, 1000.0);
        assert_eq!(windowed.len(), 100);
        // Head is zeroed
        assert!(windowed[..8].iter().all(|&s| s == 0.0));
        // Tail is untouched
        assert_eq!(windowed[99], 1.0);
        // The ramp is monotonic
        for i in 8..12 {
            assert!(windowed[i] <= windowed[i + 1] + 1e-6);
        }
    }

    #[test]
    fn test_fade_out_truncates_the_tail() {
        let ir = vec![1.0; 100];
        let windowed = fade_out_window(&ir, 0.050, 0.010, 1000.0);
        // ones = 45, fade = 10: output stops after the roll-off
        assert_eq!(windowed.len(), 55);
        assert_eq!(windowed[0], 1.0);
        assert!(windowed[54] < 0.1);
    }

    #[test]
    fn test_oversized_window_is_skipped() {
        let ir = vec![0.5; 10];
        let windowed = fade_in_window(&ir, 1.0, 0.1, 1000.0);
        assert_eq!(windowed, ir);
    }
}
