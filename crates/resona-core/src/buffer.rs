//! Fixed-length audio sample buffer
//!
//! Every edge of the render graph carries blocks of exactly the configured
//! buffer size; `SampleBuffer` is the value that travels those edges.

/// A block of mono audio samples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBuffer {
    samples: Vec<f32>,
}

impl SampleBuffer {
    /// Create a zero-filled buffer of the given length
    pub fn new(len: usize) -> Self {
        Self {
            samples: vec![0.0; len],
        }
    }

    /// Create from existing samples
    pub fn from_samples(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.samples
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Set every sample to `value`, resizing to `len`
    pub fn fill_with(&mut self, len: usize, value: f32) {
        self.samples.clear();
        self.samples.resize(len, value);
    }

    /// Zero all samples, keeping the length
    pub fn clear(&mut self) {
        self.samples.fill(0.0);
    }

    /// Apply a constant linear gain in place
    pub fn apply_gain(&mut self, gain: f32) {
        for sample in &mut self.samples {
            *sample *= gain;
        }
    }

    /// Apply a gain ramp from `previous_gain` towards `target_gain` using an
    /// exponential moving average with the given attack time.
    ///
    /// `previous_gain` is updated to the gain reached at the end of the
    /// block, so consecutive calls continue the ramp without
    /// discontinuities.
    pub fn apply_gain_exponential(
        &mut self,
        previous_gain: &mut f32,
        target_gain: f32,
        attack_seconds: f32,
        sample_rate: u32,
    ) {
        let attack_samples = attack_seconds * sample_rate as f32;
        let alpha = if attack_samples <= 1.0 {
            0.0
        } else {
            (-1.0 / attack_samples).exp()
        };

        let mut gain = *previous_gain;
        for sample in &mut self.samples {
            gain = alpha * gain + (1.0 - alpha) * target_gain;
            *sample *= gain;
        }
        *previous_gain = gain;
    }

    /// Add another buffer element-wise. Lengths must match.
    pub fn add(&mut self, other: &SampleBuffer) {
        debug_assert_eq!(self.len(), other.len(), "buffer length mismatch in add");
        for (dst, src) in self.samples.iter_mut().zip(other.samples.iter()) {
            *dst += src;
        }
    }

    /// Replace the contents with the sample-wise sum of `parts`
    pub fn set_from_mix<'a>(&mut self, parts: impl IntoIterator<Item = &'a SampleBuffer>) {
        self.samples.fill(0.0);
        for part in parts {
            if self.samples.len() < part.len() {
                self.samples.resize(part.len(), 0.0);
            }
            for (dst, src) in self.samples.iter_mut().zip(part.samples.iter()) {
                *dst += src;
            }
        }
    }

    /// Root-mean-square level of the block
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_squares / self.samples.len() as f32).sqrt()
    }

    /// True if every sample is exactly zero
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0.0)
    }
}

impl std::ops::Index<usize> for SampleBuffer {
    type Output = f32;

    fn index(&self, index: usize) -> &f32 {
        &self.samples[index]
    }
}

impl std::ops::IndexMut<usize> for SampleBuffer {
    fn index_mut(&mut self, index: usize) -> &mut f32 {
        &mut self.samples[index]
    }
}

impl From<Vec<f32>> for SampleBuffer {
    fn from(samples: Vec<f32>) -> Self {
        Self { samples }
    }
}
