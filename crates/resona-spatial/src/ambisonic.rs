//! Ambisonic encoding and the ambisonic binaural impulse response
//!
//! Real spherical harmonics up to order 3 (ACN ordering, N3D by default,
//! SN3D / maxN multipliers applied post-hoc). The bilateral pipeline
//! encodes each ear's signal into its own ambisonic field; the listener's
//! HRTF is pre-decoded at setup time over a virtual loudspeaker layout
//! into one partitioned filter per ambisonic channel and ear.

use rustfft::num_complex::Complex;

use resona_core::{CoreError, CoreResult, Ear, EarPair, SampleBuffer};
use resona_dsp::convolution::partition_impulse_response;

use crate::hrtf::HrtfService;

/// Ambisonic order (1 to 3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbisonicOrder {
    First = 1,
    Second = 2,
    Third = 3,
}

impl AmbisonicOrder {
    /// Number of channels for this order: (N + 1)^2
    pub fn channel_count(&self) -> usize {
        let n = *self as usize;
        (n + 1) * (n + 1)
    }

    pub fn from_order(order: usize) -> CoreResult<Self> {
        match order {
            1 => Ok(AmbisonicOrder::First),
            2 => Ok(AmbisonicOrder::Second),
            3 => Ok(AmbisonicOrder::Third),
            _ => Err(CoreError::OutOfRange(format!(
                "ambisonic order {order} not supported (1..=3)"
            ))),
        }
    }

    pub fn as_usize(&self) -> usize {
        *self as usize
    }
}

/// Normalization applied to the spherical-harmonic factors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmbisonicNormalization {
    #[default]
    N3d,
    Sn3d,
    MaxN,
}

/// Encodes mono signals into an (N+1)^2-channel ambisonic field
#[derive(Debug, Clone)]
pub struct AmbisonicEncoder {
    order: AmbisonicOrder,
    normalization: AmbisonicNormalization,
}

impl AmbisonicEncoder {
    pub fn new(order: AmbisonicOrder, normalization: AmbisonicNormalization) -> Self {
        Self {
            order,
            normalization,
        }
    }

    pub fn order(&self) -> AmbisonicOrder {
        self.order
    }

    pub fn channel_count(&self) -> usize {
        self.order.channel_count()
    }

    /// Allocate one zeroed channel buffer per ambisonic channel
    pub fn init_channels(&self, buffer_size: usize) -> Vec<SampleBuffer> {
        (0..self.channel_count())
            .map(|_| SampleBuffer::new(buffer_size))
            .collect()
    }

    /// Accumulate `input`, encoded at (azimuth, elevation), into the
    /// channel buffers.
    pub fn encode(
        &self,
        input: &SampleBuffer,
        channels: &mut [SampleBuffer],
        azimuth_degrees: f32,
        elevation_degrees: f32,
    ) {
        let factors = self.sh_factors(azimuth_degrees, elevation_degrees);
        for (channel, &factor) in channels.iter_mut().zip(factors.iter()) {
            for (out, &sample) in channel.as_mut_slice().iter_mut().zip(input.as_slice()) {
                *out += sample * factor;
            }
        }
    }

    /// Real spherical-harmonic factors for a direction, ACN order
    pub fn sh_factors(&self, azimuth_degrees: f32, elevation_degrees: f32) -> Vec<f32> {
        let azimuth = (azimuth_degrees as f64).to_radians();
        let elevation = (elevation_degrees as f64).to_radians();
        let mut factors = vec![0.0f64; self.channel_count()];

        let (sin_az, cos_az) = azimuth.sin_cos();
        let (sin_el, cos_el) = elevation.sin_cos();

        factors[0] = 1.0;
        factors[1] = 3.0f64.sqrt() * cos_el * sin_az;
        factors[2] = 3.0f64.sqrt() * sin_el;
        factors[3] = 3.0f64.sqrt() * cos_el * cos_az;

        if self.order.as_usize() >= 2 {
            let sin_2az = (2.0 * azimuth).sin();
            let cos_2az = (2.0 * azimuth).cos();
            let sin_2el = (2.0 * elevation).sin();
            factors[4] = 15.0f64.sqrt() / 2.0 * cos_el * cos_el * sin_2az;
            factors[5] = 15.0f64.sqrt() / 2.0 * sin_2el * sin_az;
            factors[6] = 5.0f64.sqrt() / 2.0 * (3.0 * sin_el * sin_el - 1.0);
            factors[7] = 15.0f64.sqrt() / 2.0 * sin_2el * cos_az;
            factors[8] = 15.0f64.sqrt() / 2.0 * cos_el * cos_el * cos_2az;
        }

        if self.order.as_usize() >= 3 {
            let sin_3az = (3.0 * azimuth).sin();
            let cos_3az = (3.0 * azimuth).cos();
            let sin_2az = (2.0 * azimuth).sin();
            let cos_2az = (2.0 * azimuth).cos();
            let cos_el2 = cos_el * cos_el;
            let sin_el2 = sin_el * sin_el;
            factors[9] = (35.0f64 / 8.0).sqrt() * cos_el2 * cos_el * sin_3az;
            factors[10] = 105.0f64.sqrt() / 2.0 * sin_el * cos_el2 * sin_2az;
            factors[11] = (21.0f64 / 8.0).sqrt() * cos_el * (5.0 * sin_el2 - 1.0) * sin_az;
            factors[12] = 7.0f64.sqrt() / 2.0 * sin_el * (5.0 * sin_el2 - 3.0);
            factors[13] = (21.0f64 / 8.0).sqrt() * cos_el * (5.0 * sin_el2 - 1.0) * cos_az;
            factors[14] = 105.0f64.sqrt() / 2.0 * sin_el * cos_el2 * cos_2az;
            factors[15] = (35.0f64 / 8.0).sqrt() * cos_el2 * cos_el * cos_3az;
        }

        match self.normalization {
            AmbisonicNormalization::N3d => {}
            AmbisonicNormalization::Sn3d => convert_n3d_to_sn3d(&mut factors),
            AmbisonicNormalization::MaxN => convert_n3d_to_max_n(&mut factors),
        }

        factors.into_iter().map(|f| f as f32).collect()
    }
}

fn convert_n3d_to_sn3d(factors: &mut [f64]) {
    for (index, factor) in factors.iter_mut().enumerate().skip(1) {
        let scale = if index < 4 {
            3.0f64
        } else if index < 9 {
            5.0
        } else {
            7.0
        };
        *factor /= scale.sqrt();
    }
}

fn convert_n3d_to_max_n(factors: &mut [f64]) {
    let multipliers: [f64; 16] = [
        1.0 / 2.0f64.sqrt(),
        1.0 / 3.0f64.sqrt(),
        1.0 / 3.0f64.sqrt(),
        1.0 / 3.0f64.sqrt(),
        2.0 / 15.0f64.sqrt(),
        2.0 / 15.0f64.sqrt(),
        1.0 / 5.0f64.sqrt(),
        2.0 / 15.0f64.sqrt(),
        2.0 / 15.0f64.sqrt(),
        (8.0f64 / 35.0).sqrt(),
        3.0 / 35.0f64.sqrt(),
        (45.0f64 / 224.0).sqrt(),
        1.0 / 7.0f64.sqrt(),
        (45.0f64 / 224.0).sqrt(),
        3.0 / 35.0f64.sqrt(),
        (8.0f64 / 35.0).sqrt(),
    ];
    for (factor, multiplier) in factors.iter_mut().zip(multipliers.iter()) {
        *factor *= multiplier;
    }
}

/// Virtual loudspeaker directions (azimuth, elevation in degrees, table
/// ranges) used to pre-decode the HRTF into the ambisonic basis:
/// octahedron for order 1, icosahedron for order 2, dodecahedron for
/// order 3.
pub fn virtual_speaker_orientations(order: AmbisonicOrder) -> Vec<(f32, f32)> {
    match order {
        AmbisonicOrder::First => vec![
            (90.0, 0.0),
            (270.0, 0.0),
            (0.0, 90.0),
            (0.0, 270.0),
            (0.0, 0.0),
            (180.0, 0.0),
        ],
        AmbisonicOrder::Second => vec![
            (328.28, 0.0),
            (31.72, 0.0),
            (148.28, 0.0),
            (211.72, 0.0),
            (270.0, 328.28),
            (90.0, 328.28),
            (270.0, 31.72),
            (90.0, 31.72),
            (180.0, 301.72),
            (0.0, 301.72),
            (180.0, 58.28),
            (0.0, 58.28),
        ],
        AmbisonicOrder::Third => vec![
            (290.91, 0.0),
            (69.1, 0.0),
            (249.1, 0.0),
            (110.91, 0.0),
            (315.0, 35.26),
            (45.0, 35.26),
            (225.0, 35.26),
            (135.0, 35.26),
            (315.0, 324.74),
            (45.0, 324.74),
            (225.0, 324.74),
            (135.0, 324.74),
            (0.0, 339.1),
            (180.0, 339.1),
            (0.0, 20.91),
            (180.0, 20.91),
            (270.0, 69.1),
            (90.0, 69.1),
            (270.0, 290.91),
            (90.0, 290.91),
        ],
    }
}

/// The listener's HRTF pre-decoded into the ambisonic basis: for each
/// ambisonic channel and each ear, a partitioned frequency-domain filter.
///
/// The basis is always built at order 3 (16 channels) over the
/// dodecahedral speaker layout, so the runtime ambisonic order can change
/// without rebuilding; pipelines running at a lower order simply use the
/// leading (N+1)^2 channels. Channel filters carry the
/// channel-count / speaker-count weight, so that mixing the per-channel
/// convolutions and dividing by the basis channel count reconstructs the
/// ear signal at unit gain.
pub struct AmbisonicBir {
    normalization: AmbisonicNormalization,
    block_size: usize,
    partition_count: usize,
    /// Indexed by ambisonic channel (ACN)
    channels: Vec<EarPair<Vec<Vec<Complex<f32>>>>>,
}

impl AmbisonicBir {
    /// Decode `hrtf` over the virtual speaker layout. The HRTF service
    /// must be in its ready state.
    pub fn build(
        hrtf: &HrtfService,
        normalization: AmbisonicNormalization,
    ) -> CoreResult<Self> {
        if !hrtf.is_ready() {
            return Err(CoreError::NotInitialized(
                "ambisonic BIR requires a ready HRTF service".into(),
            ));
        }

        let order = AmbisonicOrder::Third;
        let encoder = AmbisonicEncoder::new(order, normalization);
        let speakers = virtual_speaker_orientations(order);
        let channel_count = order.channel_count();
        let ir_length = hrtf.aligned_ir_length();
        let block_size = hrtf.partition_size();

        // Accumulate the weighted time-domain IRs per channel, then
        // partition once.
        let mut time_domain: Vec<EarPair<Vec<f32>>> = (0..channel_count)
            .map(|_| EarPair::new(vec![0.0; ir_length], vec![0.0; ir_length]))
            .collect();

        let weight = channel_count as f32 / speakers.len() as f32;
        for &(azimuth, elevation) in &speakers {
            let record = hrtf.resampled_record(azimuth, elevation)?;
            let factors = encoder.sh_factors(azimuth, elevation);
            for (channel, &factor) in time_domain.iter_mut().zip(factors.iter()) {
                let scale = factor * weight;
                for (acc, &sample) in channel.left.iter_mut().zip(record.left.iter()) {
                    *acc += sample * scale;
                }
                for (acc, &sample) in channel.right.iter_mut().zip(record.right.iter()) {
                    *acc += sample * scale;
                }
            }
        }

        let channels: Vec<EarPair<Vec<Vec<Complex<f32>>>>> = time_domain
            .into_iter()
            .map(|pair| {
                EarPair::new(
                    partition_impulse_response(&pair.left, block_size),
                    partition_impulse_response(&pair.right, block_size),
                )
            })
            .collect();
        let partition_count = channels
            .first()
            .map(|pair| pair.left.len())
            .unwrap_or_default();

        Ok(Self {
            normalization,
            block_size,
            partition_count,
            channels,
        })
    }

    pub fn normalization(&self) -> AmbisonicNormalization {
        self.normalization
    }

    /// Number of channels in the decoded basis (always 16)
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Partitioned filter for one ambisonic channel and ear
    pub fn channel_partitions(&self, channel: usize, ear: Ear) -> Option<&Vec<Vec<Complex<f32>>>> {
        self.channels.get(channel).map(|pair| pair.get(ear))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_channel_counts() {
        assert_eq!(AmbisonicOrder::First.channel_count(), 4);
        assert_eq!(AmbisonicOrder::Second.channel_count(), 9);
        assert_eq!(AmbisonicOrder::Third.channel_count(), 16);
        assert!(AmbisonicOrder::from_order(4).is_err());
    }

    #[test]
    fn test_first_order_factors() {
        let encoder = AmbisonicEncoder::new(AmbisonicOrder::First, AmbisonicNormalization::N3d);

        // Straight ahead: W = 1, X = sqrt(3), Y = Z = 0
        let front = encoder.sh_factors(0.0, 0.0);
        assert_relative_eq!(front[0], 1.0);
        assert_relative_eq!(front[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(front[2], 0.0, epsilon = 1e-6);
        assert_relative_eq!(front[3], 3.0f32.sqrt(), epsilon = 1e-6);

        // Hard left (azimuth 90, anti-clockwise): Y = sqrt(3)
        let left = encoder.sh_factors(90.0, 0.0);
        assert_relative_eq!(left[1], 3.0f32.sqrt(), epsilon = 1e-6);
        assert_relative_eq!(left[3], 0.0, epsilon = 1e-5);

        // Zenith: Z = sqrt(3)
        let up = encoder.sh_factors(0.0, 90.0);
        assert_relative_eq!(up[2], 3.0f32.sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn test_sn3d_scales_first_order_by_sqrt3() {
        let n3d = AmbisonicEncoder::new(AmbisonicOrder::First, AmbisonicNormalization::N3d);
        let sn3d = AmbisonicEncoder::new(AmbisonicOrder::First, AmbisonicNormalization::Sn3d);
        let a = n3d.sh_factors(30.0, 10.0);
        let b = sn3d.sh_factors(30.0, 10.0);
        assert_relative_eq!(b[0], a[0]);
        for channel in 1..4 {
            assert_relative_eq!(b[channel], a[channel] / 3.0f32.sqrt(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_encode_accumulates() {
        let encoder = AmbisonicEncoder::new(AmbisonicOrder::First, AmbisonicNormalization::N3d);
        let input = SampleBuffer::from_samples(vec![1.0; 8]);
        let mut channels = encoder.init_channels(8);

        encoder.encode(&input, &mut channels, 0.0, 0.0);
        encoder.encode(&input, &mut channels, 0.0, 0.0);

        // W accumulates both passes
        assert_relative_eq!(channels[0][0], 2.0);
    }

    #[test]
    fn test_speaker_layout_sizes() {
        assert_eq!(virtual_speaker_orientations(AmbisonicOrder::First).len(), 6);
        assert_eq!(
            virtual_speaker_orientations(AmbisonicOrder::Second).len(),
            12
        );
        assert_eq!(virtual_speaker_orientations(AmbisonicOrder::Third).len(), 20);
    }
}
