//! Typed ports: the values that travel graph edges and the exit/entry
//! points that carry them
//!
//! Service references travel as weak pointers so that swapping a service
//! during a setup phase never dangles a pointer held by a running node;
//! consumers upgrade per frame and emit silence when the upgrade fails.

use std::any::Any;
use std::sync::{Arc, Weak};

use resona_core::{SampleBuffer, Transform};

use crate::command::Command;
use crate::manager::NodeId;

/// Weak, type-erased handle to a shared service (HRTF table, SOS filter
/// table, ambisonic BIR). The owning layer downcasts on upgrade.
pub type ServiceRef = Weak<dyn Any + Send + Sync>;

/// Erase a concrete service into a [`ServiceRef`]
pub fn service_ref<T: Any + Send + Sync>(service: &Arc<T>) -> ServiceRef {
    let erased: Arc<dyn Any + Send + Sync> = service.clone();
    Arc::downgrade(&erased)
}

/// Discriminant for the port type system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Samples,
    MultiSamples,
    Transform,
    Id,
    Command,
    HrtfRef,
    SosRef,
    AbirRef,
}

/// A value travelling a graph edge
#[derive(Clone)]
pub enum PortValue {
    Samples(SampleBuffer),
    MultiSamples(Vec<SampleBuffer>),
    Transform(Transform),
    Id(String),
    Command(Command),
    HrtfRef(ServiceRef),
    SosRef(ServiceRef),
    AbirRef(ServiceRef),
}

impl PortValue {
    pub fn kind(&self) -> PortKind {
        match self {
            PortValue::Samples(_) => PortKind::Samples,
            PortValue::MultiSamples(_) => PortKind::MultiSamples,
            PortValue::Transform(_) => PortKind::Transform,
            PortValue::Id(_) => PortKind::Id,
            PortValue::Command(_) => PortKind::Command,
            PortValue::HrtfRef(_) => PortKind::HrtfRef,
            PortValue::SosRef(_) => PortKind::SosRef,
            PortValue::AbirRef(_) => PortKind::AbirRef,
        }
    }

    pub fn as_samples(&self) -> Option<&SampleBuffer> {
        match self {
            PortValue::Samples(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_multi_samples(&self) -> Option<&Vec<SampleBuffer>> {
        match self {
            PortValue::MultiSamples(buffers) => Some(buffers),
            _ => None,
        }
    }

    pub fn as_transform(&self) -> Option<Transform> {
        match self {
            PortValue::Transform(transform) => Some(*transform),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<&str> {
        match self {
            PortValue::Id(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_service_ref(&self) -> Option<&ServiceRef> {
        match self {
            PortValue::HrtfRef(service)
            | PortValue::SosRef(service)
            | PortValue::AbirRef(service) => Some(service),
            _ => None,
        }
    }
}

impl std::fmt::Debug for PortValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortValue::Samples(buffer) => write!(f, "Samples({} samples)", buffer.len()),
            PortValue::MultiSamples(buffers) => {
                write!(f, "MultiSamples({} channels)", buffers.len())
            }
            PortValue::Transform(transform) => write!(f, "Transform({transform:?})"),
            PortValue::Id(id) => write!(f, "Id({id})"),
            PortValue::Command(command) => write!(f, "Command({command:?})"),
            PortValue::HrtfRef(_) => write!(f, "HrtfRef"),
            PortValue::SosRef(_) => write!(f, "SosRef"),
            PortValue::AbirRef(_) => write!(f, "AbirRef"),
        }
    }
}

/// Subscriber side of an edge. `notify = true` entries take part in the
/// owning node's per-frame barrier; `notify = false` entries only store
/// the latest value.
#[derive(Debug)]
pub struct EntryPoint {
    pub id: String,
    pub kind: PortKind,
    pub notify: bool,
    /// Connections declared during setup
    pub connections: usize,
    /// Last value delivered
    pub value: Option<PortValue>,
}

impl EntryPoint {
    pub fn new(id: impl Into<String>, kind: PortKind, notify: bool) -> Self {
        Self {
            id: id.into(),
            kind,
            notify,
            connections: 0,
            value: None,
        }
    }
}

/// Publisher side of an edge: stores the last sent value and the attached
/// subscribers, notified in attach order.
#[derive(Debug)]
pub struct ExitPoint {
    pub id: String,
    pub kind: PortKind,
    pub value: Option<PortValue>,
    /// (target node, entry-point id) in attach order
    pub subscribers: Vec<(NodeId, String)>,
}

impl ExitPoint {
    pub fn new(id: impl Into<String>, kind: PortKind) -> Self {
        Self {
            id: id.into(),
            kind,
            value: None,
            subscribers: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_value() {
        let value = PortValue::Samples(SampleBuffer::new(4));
        assert_eq!(value.kind(), PortKind::Samples);
        assert!(value.as_samples().is_some());
        assert!(value.as_transform().is_none());
    }

    #[test]
    fn test_service_ref_roundtrip() {
        let service = Arc::new(42u32);
        let weak = service_ref(&service);
        let upgraded = weak.upgrade().unwrap();
        let downcast = upgraded.downcast::<u32>().unwrap();
        assert_eq!(*downcast, 42);

        drop(downcast);
        drop(service);
        assert!(weak.upgrade().is_none());
    }
}
