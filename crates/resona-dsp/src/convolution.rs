//! Uniformly partitioned frequency-domain convolution
//!
//! The convolver keeps a circular history of input spectra; the filter
//! partitions are supplied on every call because the spatialization layer
//! interpolates them per frame. The output spectrum for one block is
//!
//! ```text
//! Y = sum_{i=0}^{P-1} H_i * X(i blocks ago)
//! ```
//!
//! computed with a real FFT over 2B-sample frames [previous | current].
//! The first B samples of the inverse transform are the overlap and are
//! discarded; the last B samples are the output block.

use std::collections::VecDeque;
use std::sync::Arc;

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use resona_core::{record_error, CoreError, SampleBuffer};

/// Split an impulse response into ceil(L / B) blocks of length B, zero-pad
/// each to 2B and transform to the frequency domain. Offline helper used
/// once per filter at service-setup time.
pub fn partition_impulse_response(ir: &[f32], block_size: usize) -> Vec<Vec<Complex<f32>>> {
    let fft_size = block_size * 2;
    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(fft_size);

    let partition_count = ir.len().div_ceil(block_size);
    let mut partitions = Vec::with_capacity(partition_count);

    for segment in ir.chunks(block_size) {
        let mut padded = vec![0.0; fft_size];
        padded[..segment.len()].copy_from_slice(segment);

        let mut spectrum = vec![Complex::new(0.0, 0.0); fft_size / 2 + 1];
        fft.process(&mut padded, &mut spectrum).ok();
        partitions.push(spectrum);
    }
    partitions
}

/// Stateful uniformly partitioned convolver for one signal channel
pub struct UniformPartitionedConvolver {
    block_size: usize,
    fft_size: usize,
    partition_count: usize,
    fft_forward: Arc<dyn RealToComplex<f32>>,
    fft_inverse: Arc<dyn ComplexToReal<f32>>,
    /// Newest spectrum at the front
    history: VecDeque<Vec<Complex<f32>>>,
    previous_block: Vec<f32>,
}

impl UniformPartitionedConvolver {
    /// Create a convolver for `block_size`-sample blocks against filters of
    /// `partition_count` partitions.
    pub fn new(block_size: usize, partition_count: usize) -> Self {
        let fft_size = block_size * 2;
        let mut planner = RealFftPlanner::<f32>::new();
        let fft_forward = planner.plan_fft_forward(fft_size);
        let fft_inverse = planner.plan_fft_inverse(fft_size);

        let spectrum_len = fft_size / 2 + 1;
        let history = (0..partition_count)
            .map(|_| vec![Complex::new(0.0, 0.0); spectrum_len])
            .collect();

        Self {
            block_size,
            fft_size,
            partition_count,
            fft_forward,
            fft_inverse,
            history,
            previous_block: vec![0.0; block_size],
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    /// Convolve one input block, returning the accumulated output spectrum
    /// (length B + 1). Callers that mix several channels sum these spectra
    /// and run a single inverse transform.
    pub fn process_to_spectrum(
        &mut self,
        input: &[f32],
        filter_partitions: &[Vec<Complex<f32>>],
    ) -> Vec<Complex<f32>> {
        let spectrum_len = self.fft_size / 2 + 1;
        let mut accumulated = vec![Complex::new(0.0, 0.0); spectrum_len];

        if input.len() != self.block_size {
            record_error(CoreError::BadSize(format!(
                "convolver expected a {}-sample block, got {}",
                self.block_size,
                input.len()
            )));
            return accumulated;
        }

        // 2B frame: [previous block | current block]
        let mut frame = vec![0.0; self.fft_size];
        frame[..self.block_size].copy_from_slice(&self.previous_block);
        frame[self.block_size..].copy_from_slice(input);
        self.previous_block.copy_from_slice(input);

        let mut spectrum = vec![Complex::new(0.0, 0.0); spectrum_len];
        self.fft_forward.process(&mut frame, &mut spectrum).ok();

        self.history.pop_back();
        self.history.push_front(spectrum);

        let partitions = filter_partitions.len().min(self.partition_count);
        for (filter, past) in filter_partitions
            .iter()
            .take(partitions)
            .zip(self.history.iter())
        {
            for ((acc, h), x) in accumulated.iter_mut().zip(filter.iter()).zip(past.iter()) {
                *acc += h * x;
            }
        }
        accumulated
    }

    /// Convolve one input block and return the time-domain output block
    pub fn process_block(
        &mut self,
        input: &[f32],
        filter_partitions: &[Vec<Complex<f32>>],
        output: &mut SampleBuffer,
    ) {
        let spectrum = self.process_to_spectrum(input, filter_partitions);
        *output = self.inverse_transform(spectrum);
    }

    /// Inverse-transform an accumulated spectrum, discard the first B
    /// overlap samples and return the last B.
    pub fn inverse_transform(&self, mut spectrum: Vec<Complex<f32>>) -> SampleBuffer {
        let mut time = vec![0.0; self.fft_size];
        self.fft_inverse.process(&mut spectrum, &mut time).ok();

        let scale = 1.0 / self.fft_size as f32;
        let samples = time[self.block_size..]
            .iter()
            .map(|&s| s * scale)
            .collect();
        SampleBuffer::from_samples(samples)
    }

    /// Zero the spectral history and the held block. After this, P blocks
    /// of zero input produce exactly zero output.
    pub fn reset(&mut self) {
        for spectrum in &mut self.history {
            spectrum.fill(Complex::new(0.0, 0.0));
        }
        self.previous_block.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_convolution(input: &[f32], ir: &[f32]) -> Vec<f32> {
        let mut output = vec![0.0; input.len()];
        for (n, out) in output.iter_mut().enumerate() {
            for (k, &h) in ir.iter().enumerate() {
                if n >= k {
                    *out += h * input[n - k];
                }
            }
        }
        output
    }

    fn run_blocks(
        convolver: &mut UniformPartitionedConvolver,
        partitions: &[Vec<Complex<f32>>],
        input: &[f32],
        block_size: usize,
    ) -> Vec<f32> {
        let mut output = Vec::new();
        for block in input.chunks(block_size) {
            let mut out = SampleBuffer::new(block_size);
            convolver.process_block(block, partitions, &mut out);
            output.extend_from_slice(out.as_slice());
        }
        output
    }

    #[test]
    fn test_matches_direct_convolution() {
        let block_size = 16;
        let ir: Vec<f32> = (0..40).map(|i| (i as f32 * 0.7).sin() * 0.3).collect();
        let partitions = partition_impulse_response(&ir, block_size);
        assert_eq!(partitions.len(), 3);

        let input: Vec<f32> = (0..64).map(|i| (i as f32 * 1.3).cos()).collect();
        let mut convolver = UniformPartitionedConvolver::new(block_size, partitions.len());
        let output = run_blocks(&mut convolver, &partitions, &input, block_size);

        let expected = direct_convolution(&input, &ir);
        for (got, want) in output.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-4, "got {got}, want {want}");
        }
    }

    #[test]
    fn test_linearity() {
        let block_size = 8;
        let ir = vec![0.5, -0.25, 0.125, 0.0625, 0.3, -0.1];
        let partitions = partition_impulse_response(&ir, block_size);

        let x1: Vec<f32> = (0..32).map(|i| (i as f32 * 0.31).sin()).collect();
        let x2: Vec<f32> = (0..32).map(|i| (i as f32 * 0.77).cos()).collect();
        let k = 2.5f32;
        let sum: Vec<f32> = x1.iter().zip(&x2).map(|(a, b)| a + k * b).collect();

        let mut c1 = UniformPartitionedConvolver::new(block_size, partitions.len());
        let mut c2 = UniformPartitionedConvolver::new(block_size, partitions.len());
        let mut c3 = UniformPartitionedConvolver::new(block_size, partitions.len());

        let y1 = run_blocks(&mut c1, &partitions, &x1, block_size);
        let y2 = run_blocks(&mut c2, &partitions, &x2, block_size);
        let y3 = run_blocks(&mut c3, &partitions, &sum, block_size);

        for ((a, b), c) in y1.iter().zip(&y2).zip(&y3) {
            assert!((a + k * b - c).abs() < 1e-4);
        }
    }

    #[test]
    fn test_silent_decay_after_reset() {
        let block_size = 8;
        let ir = vec![1.0; 24]; // 3 partitions
        let partitions = partition_impulse_response(&ir, block_size);
        let mut convolver = UniformPartitionedConvolver::new(block_size, partitions.len());

        // Excite with noise-ish input
        let input: Vec<f32> = (0..32).map(|i| ((i * 7919) % 13) as f32 / 13.0).collect();
        let _ = run_blocks(&mut convolver, &partitions, &input, block_size);

        convolver.reset();

        // After reset, zero input must produce exactly zero output at once
        let zeros = vec![0.0; block_size];
        for _ in 0..partitions.len() + 1 {
            let mut out = SampleBuffer::new(block_size);
            convolver.process_block(&zeros, &partitions, &mut out);
            assert!(out.is_silent());
        }
    }

    #[test]
    fn test_decay_without_reset_takes_p_frames() {
        let block_size = 8;
        let ir = vec![0.9; 24];
        let partitions = partition_impulse_response(&ir, block_size);
        let p = partitions.len();
        let mut convolver = UniformPartitionedConvolver::new(block_size, p);

        let ones = vec![1.0; block_size];
        let mut out = SampleBuffer::new(block_size);
        convolver.process_block(&ones, &partitions, &mut out);

        // Feed zeros: the first zero frame still carries the previous block
        // in its 2B window, so the history is fully flushed after P + 1
        // frames and the output is exactly zero from then on.
        let zeros = vec![0.0; block_size];
        for _ in 0..p + 1 {
            convolver.process_block(&zeros, &partitions, &mut out);
        }
        assert!(out.is_silent());
    }
}
