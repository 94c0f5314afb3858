//! Processing nodes of the spatialization pipeline
//!
//! One file per node, each implementing [`resona_graph::DspNode`]:
//! - `source` - publishes the per-frame mono buffer and transform
//! - `environment` - free-field propagation delay and distance
//!   attenuation
//! - `encoder` - bilateral ambisonic encoder with ITD and near-field
//!   compensation
//! - `convolver` - ambisonic-domain partitioned convolution, one per ear
//! - `listener` - per-ear mix, listener gain, service ownership

mod convolver;
mod encoder;
mod environment;
mod listener;
mod source;

pub use convolver::AmbisonicConvolverNode;
pub use encoder::BilateralEncoderNode;
pub use environment::FreeFieldEnvironmentNode;
pub use listener::ListenerNode;
pub use source::{SourceKind, SourceNode};

use std::any::Any;
use std::sync::Arc;

use resona_core::{record_error, CoreError};
use resona_graph::ServiceRef;

/// Upgrade and downcast a service reference delivered through a port.
/// A dead or mistyped reference records a null-reference error (the
/// caller substitutes silence).
pub(crate) fn lock_service<T: Any + Send + Sync>(
    service: Option<ServiceRef>,
    what: &str,
) -> Option<Arc<T>> {
    let upgraded = service.and_then(|weak| weak.upgrade());
    let locked = upgraded.and_then(|service| service.downcast::<T>().ok());
    if locked.is_none() {
        record_error(CoreError::NullReference(format!(
            "{what} is unavailable during frame processing"
        )));
    }
    locked
}
