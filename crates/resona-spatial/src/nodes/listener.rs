//! Listener node: per-ear mix, gain, service ownership
//!
//! The listener owns the HRTF, near-field and ambisonic-BIR services and
//! exposes them on reference-typed exit points as weak handles, so a
//! service swap during a later setup phase can never dangle a pointer
//! held by a processing node. Per frame it accumulates the ear
//! contributions of every connected pipeline and emits the stereo block.

use std::any::Any;
use std::sync::Arc;

use resona_core::{EarPair, GlobalConfig, Quaternion, SampleBuffer, Transform};
use resona_graph::{
    service_ref, Command, DspNode, NodeContext, NodeSpec, PortKind, PortValue,
};

use crate::ambisonic::AmbisonicBir;
use crate::hrtf::HrtfService;
use crate::sos::SosFilterService;

pub struct ListenerNode {
    id: String,
    config: GlobalConfig,
    transform: Transform,
    gain: f32,
    hrtf: Option<Arc<HrtfService>>,
    sos: Option<Arc<SosFilterService>>,
    abir: Option<Arc<AmbisonicBir>>,
    left_buffer: SampleBuffer,
    right_buffer: SampleBuffer,
    output: EarPair<SampleBuffer>,
    frames_rendered: u64,
    /// Whether runtime HRIR queries should interpolate between grid
    /// vertices (consumed by hosts running a direct-convolution path)
    interpolation_enabled: bool,
}

impl ListenerNode {
    pub fn new(id: impl Into<String>, config: GlobalConfig) -> Self {
        let block = config.buffer_size;
        Self {
            id: id.into(),
            config,
            transform: Transform::default(),
            gain: 1.0,
            hrtf: None,
            sos: None,
            abir: None,
            left_buffer: SampleBuffer::new(block),
            right_buffer: SampleBuffer::new(block),
            output: EarPair::new(SampleBuffer::new(block), SampleBuffer::new(block)),
            frames_rendered: 0,
            interpolation_enabled: true,
        }
    }

    pub fn spec() -> NodeSpec {
        NodeSpec::new()
            .entry("leftEar", PortKind::Samples, true)
            .entry("rightEar", PortKind::Samples, true)
            .exit("leftEar", PortKind::Samples)
            .exit("rightEar", PortKind::Samples)
            .exit("listenerTransform", PortKind::Transform)
            .exit("listenerID", PortKind::Id)
            .exit("hrtfPtr", PortKind::HrtfRef)
            .exit("sosPtr", PortKind::SosRef)
            .exit("abirPtr", PortKind::AbirRef)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_transform(&mut self, transform: Transform, ctx: &mut NodeContext) {
        self.transform = transform;
        ctx.send("listenerTransform", PortValue::Transform(self.transform));
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn set_hrtf_service(&mut self, hrtf: Arc<HrtfService>) {
        self.hrtf = Some(hrtf);
    }

    pub fn set_sos_service(&mut self, sos: Arc<SosFilterService>) {
        self.sos = Some(sos);
    }

    pub fn set_ambisonic_bir(&mut self, abir: Arc<AmbisonicBir>) {
        self.abir = Some(abir);
    }

    pub fn hrtf_service(&self) -> Option<&Arc<HrtfService>> {
        self.hrtf.as_ref()
    }

    pub fn interpolation_enabled(&self) -> bool {
        self.interpolation_enabled
    }

    /// Publish the current transform, id and weak service handles.
    /// Called once the graph topology stands so every subscriber holds a
    /// value before the first tick.
    pub fn publish_state(&self, ctx: &mut NodeContext) {
        ctx.send("listenerTransform", PortValue::Transform(self.transform));
        ctx.send("listenerID", PortValue::Id(self.id.clone()));
        if let Some(hrtf) = &self.hrtf {
            ctx.send("hrtfPtr", PortValue::HrtfRef(service_ref(hrtf)));
        }
        if let Some(sos) = &self.sos {
            ctx.send("sosPtr", PortValue::SosRef(service_ref(sos)));
        }
        if let Some(abir) = &self.abir {
            ctx.send("abirPtr", PortValue::AbirRef(service_ref(abir)));
        }
    }

    /// The stereo block produced by the last completed frame
    pub fn output(&self) -> (&SampleBuffer, &SampleBuffer) {
        (&self.output.left, &self.output.right)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    fn reset_buffers(&mut self) {
        self.left_buffer.fill_with(self.config.buffer_size, 0.0);
        self.right_buffer.fill_with(self.config.buffer_size, 0.0);
    }
}

impl DspNode for ListenerNode {
    fn on_data_received(&mut self, entry_id: &str, ctx: &mut NodeContext) {
        let Some(contribution) = ctx.input_samples(entry_id) else {
            return;
        };
        match entry_id {
            "leftEar" => self.left_buffer.add(&contribution),
            "rightEar" => self.right_buffer.add(&contribution),
            _ => {}
        }
    }

    fn on_all_ready(&mut self, ctx: &mut NodeContext) {
        self.left_buffer.apply_gain(self.gain);
        self.right_buffer.apply_gain(self.gain);

        self.output.left = self.left_buffer.clone();
        self.output.right = self.right_buffer.clone();
        self.frames_rendered += 1;

        ctx.send("leftEar", PortValue::Samples(self.output.left.clone()));
        ctx.send("rightEar", PortValue::Samples(self.output.right.clone()));
        self.reset_buffers();
    }

    fn on_command(&mut self, command: &Command, ctx: &mut NodeContext) {
        if !command.is_for_listener(&self.id) {
            return;
        }
        match command.command() {
            "/listener/location" => {
                if let Some(location) = command.vector3_parameter("location") {
                    let mut transform = self.transform;
                    transform.set_position(location);
                    self.set_transform(transform, ctx);
                }
            }
            "/listener/orientation" => {
                if let Some(angles) = command.vector3_parameter("orientation") {
                    let mut transform = self.transform;
                    transform.set_orientation(Quaternion::from_yaw_pitch_roll(
                        angles.x, angles.y, angles.z,
                    ));
                    self.set_transform(transform, ctx);
                }
            }
            "/listener/orientationQuaternion" => {
                if let Some(orientation) = command.quaternion_parameter("orientation") {
                    let mut transform = self.transform;
                    transform.set_orientation(orientation.normalize());
                    self.set_transform(transform, ctx);
                }
            }
            "/listener/enableInterpolation" => {
                if let Some(enable) = command.bool_parameter("enable") {
                    self.interpolation_enabled = enable;
                }
            }
            "/listener/resetBuffers" => {
                self.reset_buffers();
            }
            _ => {}
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resona_graph::GraphManager;

    struct EarFeeder {
        left: f32,
        right: f32,
    }

    impl DspNode for EarFeeder {
        fn on_frame_tick(&mut self, ctx: &mut NodeContext) {
            ctx.send(
                "left",
                PortValue::Samples(SampleBuffer::from_samples(vec![self.left; 4])),
            );
            ctx.send(
                "right",
                PortValue::Samples(SampleBuffer::from_samples(vec![self.right; 4])),
            );
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn feeder_spec() -> NodeSpec {
        NodeSpec::new()
            .exit("left", PortKind::Samples)
            .exit("right", PortKind::Samples)
    }

    #[test]
    fn test_accumulates_all_contributions_once_per_frame() {
        let mut graph = GraphManager::new();
        let config = GlobalConfig::new(44_100, 4);
        let listener = graph
            .add_node(
                Box::new(ListenerNode::new("l1", config)),
                ListenerNode::spec(),
            )
            .unwrap();
        let feeder_a = graph
            .add_node(Box::new(EarFeeder { left: 1.0, right: 0.5 }), feeder_spec())
            .unwrap();
        let feeder_b = graph
            .add_node(Box::new(EarFeeder { left: 0.25, right: 0.25 }), feeder_spec())
            .unwrap();

        for feeder in [feeder_a, feeder_b] {
            graph.connect(feeder, "left", listener, "leftEar");
            graph.connect(feeder, "right", listener, "rightEar");
            graph.register_source(feeder);
        }
        graph.end_setup();

        graph.process_frame();
        graph.process_frame();

        let listener = graph.node_ref::<ListenerNode>(listener).unwrap();
        assert_eq!(listener.frames_rendered(), 2);
        let (left, right) = listener.output();
        assert_eq!(left[0], 1.25);
        assert_eq!(right[0], 0.75);
    }

    #[test]
    fn test_gain_is_applied() {
        let mut graph = GraphManager::new();
        let config = GlobalConfig::new(44_100, 4);
        let listener_id = graph
            .add_node(
                Box::new(ListenerNode::new("l1", config)),
                ListenerNode::spec(),
            )
            .unwrap();
        let feeder = graph
            .add_node(Box::new(EarFeeder { left: 1.0, right: 1.0 }), feeder_spec())
            .unwrap();
        graph.connect(feeder, "left", listener_id, "leftEar");
        graph.connect(feeder, "right", listener_id, "rightEar");
        graph.register_source(feeder);
        graph.end_setup();

        graph.with_node::<ListenerNode, _>(listener_id, |listener, _| listener.set_gain(0.5));
        graph.process_frame();

        let listener = graph.node_ref::<ListenerNode>(listener_id).unwrap();
        assert_eq!(listener.output().0[0], 0.5);
    }
}
