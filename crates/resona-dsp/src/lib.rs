//! resona-dsp: DSP primitives for the Resona binaural renderer
//!
//! ## Modules
//! - `biquad` - biquad filters and the two-stage cascades used by the
//!   near-field compensation path
//! - `convolution` - uniformly partitioned frequency-domain convolution
//!   with a persistent spectral input history
//! - `waveguide` - propagation-delay line with fractional all-pass readout
//! - `delay_expansion` - click-free ITD insertion by frame
//!   expansion/compression
//! - `attenuation` - inverse-distance gain with an exponential ramp

pub mod attenuation;
pub mod biquad;
pub mod convolution;
pub mod delay_expansion;
pub mod waveguide;

pub use attenuation::DistanceAttenuator;
pub use biquad::{BiquadFilter, FilterChain};
pub use convolution::{partition_impulse_response, UniformPartitionedConvolver};
pub use delay_expansion::process_add_delay;
pub use waveguide::Waveguide;
