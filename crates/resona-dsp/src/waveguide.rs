//! Propagation-delay waveguide
//!
//! Models the travel time from source to listener with a circular delay
//! line read at a fractional index. The read position follows
//! `distance * fs / c`; target changes are ramped over a short smoothing
//! interval to avoid zipper noise, and the fractional part is resolved
//! with a first-order all-pass interpolator, which also produces the
//! Doppler shift of a moving source.
//!
//! The waveguide also remembers where the source was when each block was
//! pushed, so the block leaving the line can be paired with the
//! time-coherent *effective* source position.

use std::collections::VecDeque;

use resona_core::{GlobalConfig, SampleBuffer, Vector3, DELAY_SMOOTHING_SECONDS};

/// Default maximum modelled source distance, in meters
pub const DEFAULT_MAX_DISTANCE: f32 = 100.0;

/// Circular delay line with fractional all-pass readout
pub struct Waveguide {
    buffer: Vec<f32>,
    write_pos: usize,
    current_delay: f32,
    target_delay: f32,
    /// Per-sample delay increment while ramping
    delay_step: f32,
    allpass_state: f32,
    /// Source position paired with each pushed block, newest at the back
    position_history: VecDeque<Vector3>,
    enabled: bool,
    primed: bool,
    sample_rate: u32,
    sound_speed: f32,
    block_size: usize,
}

impl Waveguide {
    pub fn new(config: &GlobalConfig) -> Self {
        Self::with_max_distance(config, DEFAULT_MAX_DISTANCE)
    }

    pub fn with_max_distance(config: &GlobalConfig, max_distance: f32) -> Self {
        let capacity =
            (max_distance * config.sample_rate as f32 / config.sound_speed()).ceil() as usize;
        let capacity = capacity.max(config.buffer_size * 2);
        Self {
            buffer: vec![0.0; capacity],
            write_pos: 0,
            current_delay: 0.0,
            target_delay: 0.0,
            delay_step: 0.0,
            allpass_state: 0.0,
            position_history: VecDeque::new(),
            enabled: true,
            primed: false,
            sample_rate: config.sample_rate,
            sound_speed: config.sound_speed(),
            block_size: config.buffer_size,
        }
    }

    pub fn enable_propagation_delay(&mut self) {
        self.enabled = true;
    }

    pub fn disable_propagation_delay(&mut self) {
        self.enabled = false;
    }

    pub fn is_propagation_delay_enabled(&self) -> bool {
        self.enabled
    }

    /// Current delay in samples, for inspection
    pub fn current_delay_samples(&self) -> f32 {
        self.current_delay
    }

    /// Push one input block and pop the delayed block, returning the
    /// effective source position for the emitted audio. With propagation
    /// delay disabled this is a pass-through.
    pub fn process(
        &mut self,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
        source_position: Vector3,
        listener_position: Vector3,
    ) -> Vector3 {
        if !self.enabled {
            *output = input.clone();
            return source_position;
        }

        let distance = (source_position - listener_position).magnitude();
        let max_delay = (self.buffer.len() - 2) as f32;
        let new_target =
            (distance * self.sample_rate as f32 / self.sound_speed).clamp(0.0, max_delay);

        if !self.primed {
            // First block: jump straight to the target, nothing to ramp from
            self.current_delay = new_target;
            self.target_delay = new_target;
            self.delay_step = 0.0;
            self.primed = true;
        } else if (new_target - self.target_delay).abs() > 1e-4 {
            // New target: ramp there linearly over the smoothing interval
            self.target_delay = new_target;
            let smoothing_samples =
                (DELAY_SMOOTHING_SECONDS * self.sample_rate as f32).max(1.0);
            self.delay_step = (self.target_delay - self.current_delay) / smoothing_samples;
        }

        self.position_history.push_back(source_position);
        let max_history = self.buffer.len() / self.block_size + 2;
        while self.position_history.len() > max_history {
            self.position_history.pop_front();
        }

        output.fill_with(input.len(), 0.0);
        let capacity = self.buffer.len();
        for i in 0..input.len() {
            self.buffer[self.write_pos] = input[i];

            // Ramp the delay towards the target
            if self.delay_step != 0.0 {
                let next = self.current_delay + self.delay_step;
                if (self.delay_step > 0.0 && next >= self.target_delay)
                    || (self.delay_step < 0.0 && next <= self.target_delay)
                {
                    self.current_delay = self.target_delay;
                    self.delay_step = 0.0;
                } else {
                    self.current_delay = next;
                }
            }

            output[i] = self.read_fractional(capacity);
            self.write_pos = (self.write_pos + 1) % capacity;
        }

        self.effective_position(source_position)
    }

    /// All-pass fractional read at (write_pos - current_delay)
    fn read_fractional(&mut self, capacity: usize) -> f32 {
        let delay = self.current_delay.max(0.0);
        let int_delay = delay.floor() as usize;
        let frac = delay - int_delay as f32;

        let newer = self.buffer[(self.write_pos + capacity - int_delay) % capacity];
        if frac < 1e-6 {
            self.allpass_state = newer;
            return newer;
        }
        let older = self.buffer[(self.write_pos + capacity - int_delay - 1) % capacity];

        let eta = (1.0 - frac) / (1.0 + frac);
        let out = eta * newer + older - eta * self.allpass_state;
        self.allpass_state = out;
        out
    }

    /// Source position at the time the audio now leaving the line was
    /// pushed
    fn effective_position(&self, fallback: Vector3) -> Vector3 {
        if self.position_history.is_empty() {
            return fallback;
        }
        let frames_back = (self.current_delay / self.block_size as f32).round() as usize;
        let index = self
            .position_history
            .len()
            .saturating_sub(1)
            .saturating_sub(frames_back);
        self.position_history
            .get(index)
            .copied()
            .unwrap_or(fallback)
    }

    /// Clear all delay-line state
    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        self.current_delay = 0.0;
        self.target_delay = 0.0;
        self.delay_step = 0.0;
        self.allpass_state = 0.0;
        self.position_history.clear();
        self.primed = false;
    }
}
