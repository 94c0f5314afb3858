//! The graph manager: node arena, setup lifecycle, frame tick and command
//! broadcast
//!
//! Topology is built while the graph is `Unlocked`; `end_setup` freezes it
//! and primes every node's barrier with the declared connection counts.
//! One frame = one tick of every source node in registration order, each
//! cascading synchronously (FIFO, attach order) until the graph is quiet.

use std::collections::{HashMap, VecDeque};

use resona_core::{record_error, CoreError};

use crate::barrier::{BarrierOutcome, WaitingList};
use crate::command::Command;
use crate::node::{DspNode, NodeContext, NodeSpec};
use crate::port::{EntryPoint, ExitPoint, PortKind, PortValue};

/// Index of a node in the graph arena
pub type NodeId = usize;

/// Reserved entry-point id for the command channel
pub const COMMAND_ENTRY_ID: &str = "command";

/// Lifecycle state of the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    /// Topology may change; no audio is processed
    Unlocked,
    /// Topology frozen; frames may be processed
    Running,
}

/// One queued packet on its way to an entry point
#[derive(Debug)]
pub(crate) struct Delivery {
    pub target: NodeId,
    pub entry_id: String,
    pub value: PortValue,
}

/// Kernel-side port storage of one node
pub(crate) struct NodeIo {
    pub entries: HashMap<String, EntryPoint>,
    pub exits: HashMap<String, ExitPoint>,
    pub waiting: WaitingList,
}

struct NodeSlot {
    /// Taken out while a hook runs so the hook can borrow the io
    node: Option<Box<dyn DspNode>>,
    io: NodeIo,
}

/// Owns the nodes and drives them frame by frame
#[derive(Default)]
pub struct GraphManager {
    slots: Vec<NodeSlot>,
    sources: Vec<NodeId>,
    state: GraphState,
    queue: VecDeque<Delivery>,
}

impl Default for GraphState {
    fn default() -> Self {
        GraphState::Unlocked
    }
}

impl GraphManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn node_count(&self) -> usize {
        self.slots.len()
    }

    /// Add a node with its declared ports. Only legal during setup.
    ///
    /// Every node implicitly owns a command entry point subscribed to the
    /// manager-wide command channel.
    pub fn add_node(&mut self, node: Box<dyn DspNode>, spec: NodeSpec) -> Option<NodeId> {
        if self.state != GraphState::Unlocked {
            record_error(CoreError::NotAllowed(
                "nodes can only be added during setup".into(),
            ));
            return None;
        }

        let mut entries = HashMap::new();
        let mut waiting = WaitingList::new();
        for (id, kind, notify) in spec.entries {
            if notify {
                waiting.add_entry(&id);
            }
            entries.insert(id.clone(), EntryPoint::new(id, kind, notify));
        }
        entries.insert(
            COMMAND_ENTRY_ID.into(),
            EntryPoint::new(COMMAND_ENTRY_ID, PortKind::Command, false),
        );

        let mut exits = HashMap::new();
        for (id, kind) in spec.exits {
            exits.insert(id.clone(), ExitPoint::new(id, kind));
        }

        self.slots.push(NodeSlot {
            node: Some(node),
            io: NodeIo {
                entries,
                exits,
                waiting,
            },
        });
        Some(self.slots.len() - 1)
    }

    /// Mark a node as a frame-tick source. Only legal during setup.
    pub fn register_source(&mut self, id: NodeId) -> bool {
        if self.state != GraphState::Unlocked {
            record_error(CoreError::NotAllowed(
                "sources can only be registered during setup".into(),
            ));
            return false;
        }
        if id >= self.slots.len() {
            record_error(CoreError::OutOfRange(format!("no node with id {id}")));
            return false;
        }
        self.sources.push(id);
        true
    }

    /// Remove a node from the frame-tick sources. Only legal during
    /// setup.
    pub fn unregister_source(&mut self, id: NodeId) -> bool {
        if self.state != GraphState::Unlocked {
            record_error(CoreError::NotAllowed(
                "sources can only be removed during setup".into(),
            ));
            return false;
        }
        let before = self.sources.len();
        self.sources.retain(|&source| source != id);
        self.sources.len() < before
    }

    /// Subscribe `to`'s entry point to `from`'s exit point. Only legal
    /// during setup; port kinds must match; a node cannot subscribe to
    /// itself.
    pub fn connect(&mut self, from: NodeId, exit_id: &str, to: NodeId, entry_id: &str) -> bool {
        if self.state != GraphState::Unlocked {
            record_error(CoreError::NotAllowed(
                "connections can only be made during setup".into(),
            ));
            return false;
        }
        if from == to {
            record_error(CoreError::NotAllowed(
                "an exit point cannot subscribe to its own node".into(),
            ));
            return false;
        }
        if entry_id == COMMAND_ENTRY_ID {
            record_error(CoreError::NotAllowed(
                "the command entry point is managed by the graph".into(),
            ));
            return false;
        }
        if from >= self.slots.len() || to >= self.slots.len() {
            record_error(CoreError::OutOfRange("connect: no such node".into()));
            return false;
        }

        let exit_kind = match self.slots[from].io.exits.get(exit_id) {
            Some(exit) => exit.kind,
            None => {
                record_error(CoreError::OutOfRange(format!(
                    "node {from} has no exit point {exit_id}"
                )));
                return false;
            }
        };
        let Some(entry) = self.slots[to].io.entries.get_mut(entry_id) else {
            record_error(CoreError::OutOfRange(format!(
                "node {to} has no entry point {entry_id}"
            )));
            return false;
        };
        if entry.kind != exit_kind {
            record_error(CoreError::CaseNotDefined(format!(
                "cannot connect {exit_kind:?} exit {exit_id} to {:?} entry {entry_id}",
                entry.kind
            )));
            return false;
        }

        entry.connections += 1;
        self.slots[from]
            .io
            .exits
            .get_mut(exit_id)
            .expect("exit existence checked above")
            .subscribers
            .push((to, entry_id.to_string()));
        true
    }

    /// Remove one subscription. Only legal during setup.
    pub fn disconnect(&mut self, from: NodeId, exit_id: &str, to: NodeId, entry_id: &str) -> bool {
        if self.state != GraphState::Unlocked {
            record_error(CoreError::NotAllowed(
                "connections can only be removed during setup".into(),
            ));
            return false;
        }
        let Some(slot) = self.slots.get_mut(from) else {
            return false;
        };
        let Some(exit) = slot.io.exits.get_mut(exit_id) else {
            return false;
        };
        let before = exit.subscribers.len();
        if let Some(position) = exit
            .subscribers
            .iter()
            .position(|(target, entry)| *target == to && entry == entry_id)
        {
            exit.subscribers.remove(position);
        }
        let removed = exit.subscribers.len() < before;
        if removed {
            if let Some(entry) = self
                .slots
                .get_mut(to)
                .and_then(|slot| slot.io.entries.get_mut(entry_id))
            {
                entry.connections = entry.connections.saturating_sub(1);
            }
        }
        removed
    }

    /// Freeze the topology and prime every barrier with the declared
    /// connection counts.
    pub fn end_setup(&mut self) {
        for slot in &mut self.slots {
            let NodeIo {
                entries, waiting, ..
            } = &mut slot.io;
            for entry in entries.values() {
                if entry.notify {
                    waiting.set_connections(&entry.id, entry.connections);
                }
            }
            waiting.reset();
        }
        self.queue.clear();
        self.state = GraphState::Running;
    }

    /// Unfreeze the topology for another setup phase
    pub fn begin_setup(&mut self) {
        self.state = GraphState::Unlocked;
        self.queue.clear();
        for slot in &mut self.slots {
            slot.io.waiting.reset();
        }
    }

    /// Run one frame: tick every source in registration order, cascading
    /// each publication to completion.
    pub fn process_frame(&mut self) {
        if self.state != GraphState::Running {
            record_error(CoreError::NotInitialized(
                "process_frame called before end_setup".into(),
            ));
            return;
        }
        let sources = self.sources.clone();
        for source in sources {
            self.call_node(source, |node, ctx| node.on_frame_tick(ctx));
            self.pump();
        }
    }

    /// Broadcast a command to every node's command entry point. Commands
    /// are dispatched between frames and take effect before the next tick.
    pub fn broadcast_command(&mut self, command: Command) {
        if command.is_null() {
            return;
        }
        for target in 0..self.slots.len() {
            self.queue.push_back(Delivery {
                target,
                entry_id: COMMAND_ENTRY_ID.into(),
                value: PortValue::Command(command.clone()),
            });
        }
        self.pump();
    }

    /// Run a closure against a node downcast to its concrete type, with a
    /// context for publishing; pending deliveries are pumped afterwards.
    pub fn with_node<T: DspNode + 'static, R>(
        &mut self,
        id: NodeId,
        f: impl FnOnce(&mut T, &mut NodeContext) -> R,
    ) -> Option<R> {
        let result = {
            let Self { slots, queue, .. } = self;
            let slot = slots.get_mut(id)?;
            let mut node = slot.node.take()?;
            let mut ctx = NodeContext {
                node_id: id,
                io: &mut slot.io,
                queue,
            };
            let result = node.as_any_mut().downcast_mut::<T>().map(|t| f(t, &mut ctx));
            slot.node = Some(node);
            result
        };
        self.pump();
        result
    }

    /// Read-only access to a node downcast to its concrete type
    pub fn node_ref<T: DspNode + 'static>(&self, id: NodeId) -> Option<&T> {
        self.slots
            .get(id)?
            .node
            .as_ref()?
            .as_any()
            .downcast_ref::<T>()
    }

    /// Last value stored on a node's exit point
    pub fn exit_value(&self, id: NodeId, exit_id: &str) -> Option<&PortValue> {
        self.slots.get(id)?.io.exits.get(exit_id)?.value.as_ref()
    }

    fn call_node(&mut self, id: NodeId, f: impl FnOnce(&mut dyn DspNode, &mut NodeContext)) {
        let Self { slots, queue, .. } = self;
        let Some(slot) = slots.get_mut(id) else {
            return;
        };
        if let Some(mut node) = slot.node.take() {
            let mut ctx = NodeContext {
                node_id: id,
                io: &mut slot.io,
                queue,
            };
            f(node.as_mut(), &mut ctx);
            slot.node = Some(node);
        }
    }

    fn pump(&mut self) {
        while let Some(delivery) = self.queue.pop_front() {
            self.deliver(delivery);
        }
    }

    fn deliver(&mut self, delivery: Delivery) {
        enum Hook {
            None,
            Command(Command),
            Data(BarrierOutcome),
        }

        let id = delivery.target;
        let Some(slot) = self.slots.get_mut(id) else {
            record_error(CoreError::OutOfRange(format!(
                "delivery to unknown node {id}"
            )));
            return;
        };

        let entry_id = delivery.entry_id;
        let hook = {
            let Some(entry) = slot.io.entries.get_mut(&entry_id) else {
                record_error(CoreError::OutOfRange(format!(
                    "node {id} has no entry point {entry_id}"
                )));
                return;
            };
            if entry.kind != delivery.value.kind() {
                record_error(CoreError::CaseNotDefined(format!(
                    "entry point {entry_id} carries {:?}, not {:?}",
                    entry.kind,
                    delivery.value.kind()
                )));
                return;
            }

            let command = match &delivery.value {
                PortValue::Command(command) if entry.kind == PortKind::Command => {
                    Some(command.clone())
                }
                _ => None,
            };
            let notify = entry.notify;
            entry.value = Some(delivery.value);

            if let Some(command) = command {
                Hook::Command(command)
            } else if notify {
                Hook::Data(slot.io.waiting.on_received(&entry_id))
            } else {
                Hook::None
            }
        };

        match hook {
            Hook::None => {}
            Hook::Command(command) => {
                self.call_node(id, |node, ctx| node.on_command(&command, ctx));
            }
            Hook::Data(outcome) => {
                self.call_node(id, |node, ctx| node.on_data_received(&entry_id, ctx));
                match outcome {
                    BarrierOutcome::Untracked | BarrierOutcome::Partial => {}
                    BarrierOutcome::EntryReady => {
                        self.call_node(id, |node, ctx| node.on_entry_ready(&entry_id, ctx));
                    }
                    BarrierOutcome::AllReady => {
                        self.call_node(id, |node, ctx| node.on_entry_ready(&entry_id, ctx));
                        self.call_node(id, |node, ctx| node.on_all_ready(ctx));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resona_core::SampleBuffer;
    use std::any::Any;

    /// Publishes a constant block on every tick
    struct TestSource {
        value: f32,
    }

    impl DspNode for TestSource {
        fn on_frame_tick(&mut self, ctx: &mut NodeContext) {
            ctx.send(
                "samples",
                PortValue::Samples(SampleBuffer::from_samples(vec![self.value; 4])),
            );
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    /// Adds one to each sample and forwards
    struct TestGain;

    impl DspNode for TestGain {
        fn on_all_ready(&mut self, ctx: &mut NodeContext) {
            let mut buffer = ctx.input_samples("in").unwrap();
            buffer.apply_gain(2.0);
            ctx.send("out", PortValue::Samples(buffer));
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    /// Counts barrier completions and mixes its inputs
    struct TestSink {
        frames: usize,
        packets: usize,
        last: Option<SampleBuffer>,
        last_command: Option<String>,
    }

    impl TestSink {
        fn new() -> Self {
            Self {
                frames: 0,
                packets: 0,
                last: None,
                last_command: None,
            }
        }
    }

    impl DspNode for TestSink {
        fn on_data_received(&mut self, _entry_id: &str, ctx: &mut NodeContext) {
            self.packets += 1;
            self.last = ctx.input_samples("in");
        }

        fn on_all_ready(&mut self, _ctx: &mut NodeContext) {
            self.frames += 1;
        }

        fn on_command(&mut self, command: &Command, _ctx: &mut NodeContext) {
            self.last_command = Some(command.command().to_string());
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn source_spec() -> NodeSpec {
        NodeSpec::new().exit("samples", PortKind::Samples)
    }

    fn gain_spec() -> NodeSpec {
        NodeSpec::new()
            .entry("in", PortKind::Samples, true)
            .exit("out", PortKind::Samples)
    }

    fn sink_spec() -> NodeSpec {
        NodeSpec::new().entry("in", PortKind::Samples, true)
    }

    #[test]
    fn test_frame_cascade() {
        let mut graph = GraphManager::new();
        let source = graph
            .add_node(Box::new(TestSource { value: 1.0 }), source_spec())
            .unwrap();
        let gain = graph.add_node(Box::new(TestGain), gain_spec()).unwrap();
        let sink = graph.add_node(Box::new(TestSink::new()), sink_spec()).unwrap();

        assert!(graph.connect(source, "samples", gain, "in"));
        assert!(graph.connect(gain, "out", sink, "in"));
        graph.register_source(source);
        graph.end_setup();

        graph.process_frame();
        graph.process_frame();

        let sink = graph.node_ref::<TestSink>(sink).unwrap();
        assert_eq!(sink.frames, 2);
        assert_eq!(sink.last.as_ref().unwrap().as_slice(), &[2.0; 4]);
    }

    #[test]
    fn test_barrier_waits_for_all_sources() {
        let mut graph = GraphManager::new();
        let a = graph
            .add_node(Box::new(TestSource { value: 1.0 }), source_spec())
            .unwrap();
        let b = graph
            .add_node(Box::new(TestSource { value: 2.0 }), source_spec())
            .unwrap();
        let sink = graph.add_node(Box::new(TestSink::new()), sink_spec()).unwrap();

        graph.connect(a, "samples", sink, "in");
        graph.connect(b, "samples", sink, "in");
        graph.register_source(a);
        graph.register_source(b);
        graph.end_setup();

        graph.process_frame();

        let sink = graph.node_ref::<TestSink>(sink).unwrap();
        // Two packets arrived but the barrier fired exactly once
        assert_eq!(sink.packets, 2);
        assert_eq!(sink.frames, 1);
    }

    #[test]
    fn test_topology_frozen_while_running() {
        let mut graph = GraphManager::new();
        let source = graph
            .add_node(Box::new(TestSource { value: 0.0 }), source_spec())
            .unwrap();
        let sink = graph.add_node(Box::new(TestSink::new()), sink_spec()).unwrap();
        graph.connect(source, "samples", sink, "in");
        graph.end_setup();

        assert!(!graph.connect(source, "samples", sink, "in"));
        assert!(graph
            .add_node(Box::new(TestSink::new()), sink_spec())
            .is_none());

        graph.begin_setup();
        assert!(graph.connect(source, "samples", sink, "in"));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let mut graph = GraphManager::new();
        let source = graph
            .add_node(Box::new(TestSource { value: 0.0 }), source_spec())
            .unwrap();
        let sink = graph.add_node(
            Box::new(TestSink::new()),
            NodeSpec::new().entry("in", PortKind::Transform, true),
        );
        assert!(!graph.connect(source, "samples", sink.unwrap(), "in"));
    }

    #[test]
    fn test_command_broadcast_reaches_every_node() {
        let mut graph = GraphManager::new();
        let sink_a = graph.add_node(Box::new(TestSink::new()), sink_spec()).unwrap();
        let sink_b = graph.add_node(Box::new(TestSink::new()), sink_spec()).unwrap();
        graph.end_setup();

        let command = Command::parse(r#"{"command": "/source/resetBuffers", "sourceID": "s"}"#)
            .unwrap();
        graph.broadcast_command(command);

        for id in [sink_a, sink_b] {
            let sink = graph.node_ref::<TestSink>(id).unwrap();
            assert_eq!(sink.last_command.as_deref(), Some("/source/resetBuffers"));
        }
    }
}
