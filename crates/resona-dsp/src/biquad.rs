//! Biquad filters and filter chains
//!
//! The near-field compensation service hands out raw coefficient sets
//! (two stages of {b0, b1, b2, a0, a1, a2} per ear), so the filter here is
//! coefficient-driven rather than built from frequency/Q design formulas.

use resona_core::{record_error, CoreError, SampleBuffer};

/// Number of coefficients in one biquad stage
pub const COEFFICIENTS_PER_STAGE: usize = 6;

/// Single biquad section, Direct Form I
#[derive(Debug, Clone, Default)]
pub struct BiquadFilter {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    // State
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadFilter {
    /// Identity filter (passes the signal unchanged)
    pub fn new() -> Self {
        Self {
            b0: 1.0,
            ..Default::default()
        }
    }

    /// Set {b0, b1, b2, a0, a1, a2}; everything is normalized by a0.
    /// An a0 of zero is rejected and the previous coefficients kept.
    pub fn set_coefficients(&mut self, coefficients: &[f32]) -> bool {
        if coefficients.len() != COEFFICIENTS_PER_STAGE {
            record_error(CoreError::BadSize(format!(
                "biquad stage needs {COEFFICIENTS_PER_STAGE} coefficients, got {}",
                coefficients.len()
            )));
            return false;
        }
        let a0 = coefficients[3];
        if a0 == 0.0 {
            record_error(CoreError::DivByZero("biquad a0 coefficient is zero".into()));
            return false;
        }
        self.b0 = coefficients[0] / a0;
        self.b1 = coefficients[1] / a0;
        self.b2 = coefficients[2] / a0;
        self.a1 = coefficients[4] / a0;
        self.a2 = coefficients[5] / a0;
        true
    }

    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        let output = self.b0 * input + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }

    /// Filter a buffer in place
    pub fn process(&mut self, buffer: &mut SampleBuffer) {
        for sample in buffer.as_mut_slice() {
            *sample = self.process_sample(*sample);
        }
    }

    /// Clear the filter state, keeping the coefficients
    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

/// Cascade of biquad stages processed in series
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    stages: Vec<BiquadFilter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cascade with `count` identity stages
    pub fn with_stages(count: usize) -> Self {
        Self {
            stages: (0..count).map(|_| BiquadFilter::new()).collect(),
        }
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage_mut(&mut self, index: usize) -> Option<&mut BiquadFilter> {
        self.stages.get_mut(index)
    }

    /// Load a flat coefficient slice, `COEFFICIENTS_PER_STAGE` values per
    /// stage, into the cascade. The slice length must match the cascade.
    pub fn set_coefficients(&mut self, coefficients: &[f32]) -> bool {
        if coefficients.len() != self.stages.len() * COEFFICIENTS_PER_STAGE {
            record_error(CoreError::BadSize(format!(
                "filter chain with {} stages needs {} coefficients, got {}",
                self.stages.len(),
                self.stages.len() * COEFFICIENTS_PER_STAGE,
                coefficients.len()
            )));
            return false;
        }
        for (stage, chunk) in self
            .stages
            .iter_mut()
            .zip(coefficients.chunks(COEFFICIENTS_PER_STAGE))
        {
            if !stage.set_coefficients(chunk) {
                return false;
            }
        }
        true
    }

    /// Filter a buffer in place through every stage
    pub fn process(&mut self, buffer: &mut SampleBuffer) {
        for stage in &mut self.stages {
            stage.process(buffer);
        }
    }

    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }
}
