//! The node interface and the context handed to node hooks

use std::any::Any;
use std::collections::VecDeque;

use resona_core::{record_error, CoreError, SampleBuffer, Transform};

use crate::command::Command;
use crate::manager::{Delivery, NodeId, NodeIo};
use crate::port::{PortKind, PortValue, ServiceRef};

/// A processing node in the render graph.
///
/// The kernel performs all port and barrier bookkeeping; implementations
/// react through these hooks. Hooks receive a [`NodeContext`] for reading
/// stored entry-point values and publishing on the node's exit points.
pub trait DspNode: Send {
    /// Called once per frame on *source* nodes to publish their block
    fn on_frame_tick(&mut self, _ctx: &mut NodeContext) {}

    /// Called on every packet delivered to a notifying entry point,
    /// including multiplicity-zero entries that bypass the barrier
    fn on_data_received(&mut self, _entry_id: &str, _ctx: &mut NodeContext) {}

    /// Called when one entry point has received its declared number of
    /// packets for this frame
    fn on_entry_ready(&mut self, _entry_id: &str, _ctx: &mut NodeContext) {}

    /// Called when every tracked entry point is full; the barrier has
    /// already been reset for the next frame
    fn on_all_ready(&mut self, _ctx: &mut NodeContext) {}

    /// Called for every broadcast command; implementations filter by
    /// selector
    fn on_command(&mut self, _command: &Command, _ctx: &mut NodeContext) {}

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Port declaration for a node, consumed by
/// [`GraphManager::add_node`](crate::GraphManager::add_node)
#[derive(Debug, Default)]
pub struct NodeSpec {
    pub(crate) entries: Vec<(String, PortKind, bool)>,
    pub(crate) exits: Vec<(String, PortKind)>,
}

impl NodeSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an entry point. `notify` entries take part in the
    /// per-frame barrier; non-notify entries only store the latest value.
    pub fn entry(mut self, id: impl Into<String>, kind: PortKind, notify: bool) -> Self {
        self.entries.push((id.into(), kind, notify));
        self
    }

    /// Declare an exit point
    pub fn exit(mut self, id: impl Into<String>, kind: PortKind) -> Self {
        self.exits.push((id.into(), kind));
        self
    }
}

/// Access to a node's own ports during a hook
pub struct NodeContext<'a> {
    pub(crate) node_id: NodeId,
    pub(crate) io: &'a mut NodeIo,
    pub(crate) queue: &'a mut VecDeque<Delivery>,
}

impl NodeContext<'_> {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Publish a value on one of this node's exit points. The value is
    /// stored on the exit point and queued for every subscriber in attach
    /// order.
    pub fn send(&mut self, exit_id: &str, value: PortValue) {
        let Some(exit) = self.io.exits.get_mut(exit_id) else {
            record_error(CoreError::OutOfRange(format!(
                "node has no exit point named {exit_id}"
            )));
            return;
        };
        if exit.kind != value.kind() {
            record_error(CoreError::CaseNotDefined(format!(
                "exit point {exit_id} carries {:?}, not {:?}",
                exit.kind,
                value.kind()
            )));
            return;
        }
        for (target, entry_id) in &exit.subscribers {
            self.queue.push_back(Delivery {
                target: *target,
                entry_id: entry_id.clone(),
                value: value.clone(),
            });
        }
        exit.value = Some(value);
    }

    /// Latest value stored at an entry point
    pub fn input(&self, entry_id: &str) -> Option<&PortValue> {
        self.io.entries.get(entry_id)?.value.as_ref()
    }

    /// Samples stored at an entry point, cloned (buffers travel by value)
    pub fn input_samples(&self, entry_id: &str) -> Option<SampleBuffer> {
        self.input(entry_id)?.as_samples().cloned()
    }

    pub fn input_multi_samples(&self, entry_id: &str) -> Option<Vec<SampleBuffer>> {
        self.input(entry_id)?.as_multi_samples().cloned()
    }

    pub fn input_transform(&self, entry_id: &str) -> Option<Transform> {
        self.input(entry_id)?.as_transform()
    }

    pub fn input_id(&self, entry_id: &str) -> Option<String> {
        self.input(entry_id)?.as_id().map(str::to_owned)
    }

    pub fn input_service(&self, entry_id: &str) -> Option<ServiceRef> {
        self.input(entry_id)?.as_service_ref().cloned()
    }
}
