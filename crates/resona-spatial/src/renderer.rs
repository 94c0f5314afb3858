//! Binaural renderer: assembles and drives the whole render graph
//!
//! For every (source, listener) pair the renderer wires the chain
//!
//! ```text
//! source -> free-field environment -> bilateral ambisonic encoder
//!        -> ambisonic convolver (left / right) -> listener mix
//! ```
//!
//! Sources and listeners can only be added or removed during a setup
//! phase; `end_setup` freezes the topology and publishes every service
//! handle and transform, after which `process_frame` renders one block
//! per call.

use std::collections::HashMap;
use std::sync::Arc;

use resona_core::{
    record_error, CoreError, CoreResult, Ear, GlobalConfig, SampleBuffer, Transform,
};
use resona_graph::{Command, GraphManager, GraphState, NodeId};

use crate::ambisonic::{AmbisonicBir, AmbisonicNormalization, AmbisonicOrder};
use crate::hrtf::HrtfService;
use crate::nodes::{
    AmbisonicConvolverNode, BilateralEncoderNode, FreeFieldEnvironmentNode, ListenerNode,
    SourceKind, SourceNode,
};
use crate::sos::SosFilterService;

struct SourceChain {
    node: NodeId,
}

struct ListenerChain {
    node: NodeId,
    convolver_left: NodeId,
    convolver_right: NodeId,
    order: AmbisonicOrder,
    normalization: AmbisonicNormalization,
}

struct PairChain {
    source_id: String,
    listener_id: String,
    environment: NodeId,
    encoder: NodeId,
}

/// Owns the graph and the per-source / per-listener node chains
pub struct BinauralRenderer {
    config: GlobalConfig,
    graph: GraphManager,
    sources: HashMap<String, SourceChain>,
    listeners: HashMap<String, ListenerChain>,
    pairs: Vec<PairChain>,
}

impl BinauralRenderer {
    pub fn new(config: GlobalConfig) -> Self {
        Self {
            config,
            graph: GraphManager::new(),
            sources: HashMap::new(),
            listeners: HashMap::new(),
            pairs: Vec::new(),
        }
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    /// Reopen the topology for changes
    pub fn begin_setup(&mut self) {
        self.graph.begin_setup();
    }

    /// Freeze the topology and publish transforms and service handles so
    /// every entry point holds a value before the first tick.
    pub fn end_setup(&mut self) {
        self.graph.end_setup();
        let listener_nodes: Vec<NodeId> =
            self.listeners.values().map(|chain| chain.node).collect();
        for node in listener_nodes {
            self.graph
                .with_node::<ListenerNode, _>(node, |listener, ctx| listener.publish_state(ctx));
        }
        let source_nodes: Vec<NodeId> = self.sources.values().map(|chain| chain.node).collect();
        for node in source_nodes {
            self.graph
                .with_node::<SourceNode, _>(node, |source, ctx| source.publish_state(ctx));
        }
    }

    /// Add a source. Only legal during setup.
    pub fn add_source(&mut self, id: impl Into<String>, kind: SourceKind) -> CoreResult<()> {
        let id = id.into();
        self.ensure_setup("add_source")?;
        if self.sources.contains_key(&id) {
            return Err(self.not_allowed(format!("source {id} already exists")));
        }

        let node = self
            .graph
            .add_node(
                Box::new(SourceNode::new(id.clone(), kind, self.config)),
                SourceNode::spec(),
            )
            .ok_or_else(|| CoreError::NotAllowed("source node rejected".into()))?;
        self.graph.register_source(node);
        self.sources.insert(id.clone(), SourceChain { node });

        let listener_ids: Vec<String> = self.listeners.keys().cloned().collect();
        for listener_id in listener_ids {
            self.wire_pair(&id, &listener_id);
        }
        Ok(())
    }

    /// Remove a source and its pair chains. Only legal during setup.
    pub fn remove_source(&mut self, id: &str) -> CoreResult<()> {
        self.ensure_setup("remove_source")?;
        let Some(chain) = self.sources.remove(id) else {
            return Err(self.not_allowed(format!("no source named {id}")));
        };

        let removed: Vec<PairChain> = {
            let (kept, removed) = std::mem::take(&mut self.pairs)
                .into_iter()
                .partition(|pair| pair.source_id != id);
            self.pairs = kept;
            removed
        };
        for pair in removed {
            let Some(listener) = self.listeners.get(&pair.listener_id) else {
                continue;
            };
            self.graph
                .disconnect(chain.node, "samples", pair.environment, "samples");
            self.graph.disconnect(
                chain.node,
                "sourceTransform",
                pair.environment,
                "sourceTransform",
            );
            self.graph.disconnect(
                listener.node,
                "listenerTransform",
                pair.environment,
                "listenerTransform",
            );
            self.graph
                .disconnect(pair.environment, "outSamples", pair.encoder, "samples");
            self.graph.disconnect(
                pair.environment,
                "effectiveSourceTransform",
                pair.encoder,
                "sourceTransform",
            );
            self.graph.disconnect(
                listener.node,
                "listenerTransform",
                pair.encoder,
                "listenerTransform",
            );
            self.graph
                .disconnect(listener.node, "hrtfPtr", pair.encoder, "listenerHRTF");
            self.graph
                .disconnect(listener.node, "sosPtr", pair.encoder, "listenerSOS");
            self.graph.disconnect(
                pair.encoder,
                "leftChannels",
                listener.convolver_left,
                "inputChannels",
            );
            self.graph.disconnect(
                pair.encoder,
                "rightChannels",
                listener.convolver_right,
                "inputChannels",
            );
        }
        self.graph.unregister_source(chain.node);
        Ok(())
    }

    /// Add a listener with its acoustic services. The ambisonic BIR is
    /// decoded from the HRTF here, once, at setup time.
    pub fn add_listener(
        &mut self,
        id: impl Into<String>,
        hrtf: Arc<HrtfService>,
        sos: Option<Arc<SosFilterService>>,
        order: AmbisonicOrder,
        normalization: AmbisonicNormalization,
    ) -> CoreResult<()> {
        let id = id.into();
        self.ensure_setup("add_listener")?;
        if self.listeners.contains_key(&id) {
            return Err(self.not_allowed(format!("listener {id} already exists")));
        }

        let abir = Arc::new(AmbisonicBir::build(&hrtf, normalization)?);

        let node = self
            .graph
            .add_node(
                Box::new(ListenerNode::new(id.clone(), self.config)),
                ListenerNode::spec(),
            )
            .ok_or_else(|| CoreError::NotAllowed("listener node rejected".into()))?;
        let convolver_left = self
            .graph
            .add_node(
                Box::new(AmbisonicConvolverNode::new(
                    id.clone(),
                    Ear::Left,
                    self.config,
                    order,
                )),
                AmbisonicConvolverNode::spec(),
            )
            .ok_or_else(|| CoreError::NotAllowed("convolver node rejected".into()))?;
        let convolver_right = self
            .graph
            .add_node(
                Box::new(AmbisonicConvolverNode::new(
                    id.clone(),
                    Ear::Right,
                    self.config,
                    order,
                )),
                AmbisonicConvolverNode::spec(),
            )
            .ok_or_else(|| CoreError::NotAllowed("convolver node rejected".into()))?;

        let has_sos = sos.is_some();
        self.graph.with_node::<ListenerNode, _>(node, |listener, _| {
            listener.set_hrtf_service(hrtf);
            if let Some(sos) = sos {
                listener.set_sos_service(sos);
            }
            listener.set_ambisonic_bir(abir);
        });

        self.graph
            .connect(convolver_left, "outSamples", node, "leftEar");
        self.graph
            .connect(convolver_right, "outSamples", node, "rightEar");
        self.graph
            .connect(node, "abirPtr", convolver_left, "listenerABIR");
        self.graph
            .connect(node, "abirPtr", convolver_right, "listenerABIR");

        self.listeners.insert(
            id.clone(),
            ListenerChain {
                node,
                convolver_left,
                convolver_right,
                order,
                normalization,
            },
        );

        let source_ids: Vec<String> = self.sources.keys().cloned().collect();
        for source_id in source_ids {
            self.wire_pair(&source_id, &id);
        }

        if !has_sos {
            log::debug!("listener {id} has no near-field service; the compensation stage will pass through");
        }
        Ok(())
    }

    fn wire_pair(&mut self, source_id: &str, listener_id: &str) {
        let (source_node, listener) = match (
            self.sources.get(source_id),
            self.listeners.get(listener_id),
        ) {
            (Some(source), Some(listener)) => (source.node, listener),
            _ => return,
        };

        let Some(environment) = self.graph.add_node(
            Box::new(FreeFieldEnvironmentNode::new(source_id, self.config)),
            FreeFieldEnvironmentNode::spec(),
        ) else {
            return;
        };
        let Some(encoder) = self.graph.add_node(
            Box::new(BilateralEncoderNode::new(
                source_id,
                listener_id,
                self.config,
                listener.order,
                listener.normalization,
            )),
            BilateralEncoderNode::spec(),
        ) else {
            return;
        };

        self.graph
            .connect(source_node, "samples", environment, "samples");
        self.graph
            .connect(source_node, "sourceTransform", environment, "sourceTransform");
        self.graph.connect(
            listener.node,
            "listenerTransform",
            environment,
            "listenerTransform",
        );

        self.graph
            .connect(environment, "outSamples", encoder, "samples");
        self.graph.connect(
            environment,
            "effectiveSourceTransform",
            encoder,
            "sourceTransform",
        );
        self.graph.connect(
            listener.node,
            "listenerTransform",
            encoder,
            "listenerTransform",
        );
        self.graph
            .connect(listener.node, "hrtfPtr", encoder, "listenerHRTF");
        self.graph
            .connect(listener.node, "sosPtr", encoder, "listenerSOS");

        self.graph.connect(
            encoder,
            "leftChannels",
            listener.convolver_left,
            "inputChannels",
        );
        self.graph.connect(
            encoder,
            "rightChannels",
            listener.convolver_right,
            "inputChannels",
        );

        self.pairs.push(PairChain {
            source_id: source_id.to_string(),
            listener_id: listener_id.to_string(),
            environment,
            encoder,
        });
    }

    /// Hand a source its next mono block
    pub fn set_source_buffer(&mut self, id: &str, buffer: SampleBuffer) -> bool {
        if buffer.len() != self.config.buffer_size {
            record_error(CoreError::BadSize(format!(
                "source buffer for {id} has {} samples, expected {}",
                buffer.len(),
                self.config.buffer_size
            )));
            return false;
        }
        let Some(node) = self.sources.get(id).map(|chain| chain.node) else {
            return false;
        };
        self.graph
            .with_node::<SourceNode, _>(node, |source, _| source.set_buffer(buffer))
            .is_some()
    }

    pub fn set_source_transform(&mut self, id: &str, transform: Transform) -> bool {
        let Some(node) = self.sources.get(id).map(|chain| chain.node) else {
            return false;
        };
        self.graph
            .with_node::<SourceNode, _>(node, |source, ctx| {
                source.set_transform(transform);
                source.publish_state(ctx);
            })
            .is_some()
    }

    pub fn set_listener_transform(&mut self, id: &str, transform: Transform) -> bool {
        let Some(node) = self.listeners.get(id).map(|chain| chain.node) else {
            return false;
        };
        self.graph
            .with_node::<ListenerNode, _>(node, |listener, ctx| {
                listener.set_transform(transform, ctx)
            })
            .is_some()
    }

    /// Render one block for every listener
    pub fn process_frame(&mut self) {
        self.graph.process_frame();
    }

    /// The stereo block a listener produced in the last frame
    pub fn listener_output(&self, id: &str) -> Option<(SampleBuffer, SampleBuffer)> {
        let chain = self.listeners.get(id)?;
        let listener = self.graph.node_ref::<ListenerNode>(chain.node)?;
        let (left, right) = listener.output();
        Some((left.clone(), right.clone()))
    }

    /// Parse and broadcast a JSON command string. Malformed commands are
    /// logged and dropped; unknown command selectors are ignored by the
    /// nodes.
    pub fn send_command(&mut self, json: &str) -> bool {
        match Command::parse(json) {
            Some(command) => {
                self.broadcast_command(command);
                true
            }
            None => false,
        }
    }

    /// Broadcast an already-parsed command to every node. Takes effect
    /// before the next frame tick.
    pub fn broadcast_command(&mut self, command: Command) {
        self.graph.broadcast_command(command);
    }

    fn ensure_setup(&self, operation: &str) -> CoreResult<()> {
        if self.graph.state() != GraphState::Unlocked {
            return Err(self.not_allowed(format!("{operation} is only legal during setup")));
        }
        Ok(())
    }

    fn not_allowed(&self, message: String) -> CoreError {
        let error = CoreError::NotAllowed(message);
        record_error(error.clone());
        error
    }
}
