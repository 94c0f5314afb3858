//! resona-spatial: spatialization services and processing nodes
//!
//! The crate has two halves:
//!
//! **Services** are immutable-after-setup lookup tables shared by any
//! number of render pipelines:
//! - [`HrtfService`] - head-related impulse responses resampled onto a
//!   quasi-uniform sphere grid, windowed, ITD-separated and partitioned
//!   for frequency-domain convolution
//! - [`SosFilterService`] - near-field compensation biquad coefficients
//!   indexed by distance and interaural azimuth
//! - [`AmbisonicBir`] - the listener's HRTF pre-decoded into a partitioned
//!   binaural impulse response per ambisonic channel and ear
//!
//! **Nodes** implement the per-source render chain on top of the
//! resona-graph kernel:
//! source -> free-field environment -> bilateral ambisonic encoder ->
//! ambisonic-domain convolver (per ear) -> listener mix.
//!
//! [`BinauralRenderer`] assembles the whole graph for a set of sources and
//! listeners.

pub mod ambisonic;
pub mod hrtf;
pub mod nodes;
pub mod relative_position;
pub mod renderer;
pub mod sos;

pub use ambisonic::{AmbisonicBir, AmbisonicEncoder, AmbisonicNormalization, AmbisonicOrder};
pub use hrtf::{ExtrapolationMethod, HrirRecord, HrtfService, PartitionedHrir, WindowingConfig};
pub use nodes::{
    AmbisonicConvolverNode, BilateralEncoderNode, FreeFieldEnvironmentNode, ListenerNode,
    SourceKind, SourceNode,
};
pub use relative_position::RelativePosition;
pub use renderer::BinauralRenderer;
pub use sos::SosFilterService;
