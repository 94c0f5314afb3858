//! Free-field environment node: propagation delay plus distance
//! attenuation

use std::any::Any;

use resona_core::{GlobalConfig, SampleBuffer, Transform};
use resona_dsp::{DistanceAttenuator, Waveguide};
use resona_graph::{Command, DspNode, NodeContext, NodeSpec, PortKind, PortValue};

/// Applies the effects of free-space propagation to one source: a
/// waveguide delay line (with fractional readout for Doppler-accurate
/// motion) followed by inverse-distance attenuation. Publishes the
/// processed block together with the *effective* source transform, the
/// position the source had when the emitted audio left it, so downstream
/// stages stay time-coherent.
pub struct FreeFieldEnvironmentNode {
    source_id: String,
    config: GlobalConfig,
    waveguide: Waveguide,
    attenuator: DistanceAttenuator,
    enabled: bool,
}

impl FreeFieldEnvironmentNode {
    pub fn new(source_id: impl Into<String>, config: GlobalConfig) -> Self {
        Self {
            source_id: source_id.into(),
            waveguide: Waveguide::new(&config),
            attenuator: DistanceAttenuator::new(),
            config,
            enabled: true,
        }
    }

    pub fn spec() -> NodeSpec {
        NodeSpec::new()
            .entry("samples", PortKind::Samples, true)
            .entry("sourceTransform", PortKind::Transform, false)
            .entry("listenerTransform", PortKind::Transform, false)
            .exit("effectiveSourceTransform", PortKind::Transform)
            .exit("outSamples", PortKind::Samples)
    }

    fn matches_source(&self, command: &Command) -> bool {
        match command.source_id() {
            Some(id) => id == self.source_id,
            // Unselected environment commands apply everywhere
            None => true,
        }
    }
}

impl DspNode for FreeFieldEnvironmentNode {
    fn on_all_ready(&mut self, ctx: &mut NodeContext) {
        let Some(input) = ctx.input_samples("samples") else {
            return;
        };
        debug_assert_eq!(input.len(), self.config.buffer_size, "buffer size mismatch");
        let source_transform = ctx.input_transform("sourceTransform").unwrap_or_default();
        let listener_transform = ctx.input_transform("listenerTransform").unwrap_or_default();

        if !self.enabled {
            // Transform first: subscribers read it when the samples land
            ctx.send(
                "effectiveSourceTransform",
                PortValue::Transform(source_transform),
            );
            ctx.send("outSamples", PortValue::Samples(input));
            return;
        }

        let mut delayed = SampleBuffer::new(input.len());
        let effective_position = self.waveguide.process(
            &input,
            &mut delayed,
            source_transform.position(),
            listener_transform.position(),
        );
        let mut effective_transform = source_transform;
        effective_transform.set_position(effective_position);

        let mut output = SampleBuffer::new(delayed.len());
        self.attenuator.process(
            &delayed,
            &mut output,
            &effective_transform,
            &listener_transform,
            &self.config,
        );

        ctx.send(
            "effectiveSourceTransform",
            PortValue::Transform(effective_transform),
        );
        ctx.send("outSamples", PortValue::Samples(output));
    }

    fn on_command(&mut self, command: &Command, _ctx: &mut NodeContext) {
        if !self.matches_source(command) {
            return;
        }
        match command.command() {
            "/environment/enableProcessor" => {
                if let Some(enable) = command.bool_parameter("enable") {
                    self.enabled = enable;
                }
            }
            "/environment/enablePropagationDelay" => {
                if let Some(enable) = command.bool_parameter("enable") {
                    if enable {
                        self.waveguide.enable_propagation_delay();
                    } else {
                        self.waveguide.disable_propagation_delay();
                    }
                }
            }
            "/environment/enableDistanceAttenuation" => {
                if let Some(enable) = command.bool_parameter("enable") {
                    if enable {
                        self.attenuator.enable_processor();
                    } else {
                        self.attenuator.disable_processor();
                    }
                }
            }
            "/source/resetBuffers" => {
                if command.source_id() == Some(self.source_id.as_str()) {
                    self.waveguide.reset();
                    self.attenuator.reset();
                }
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
    use resona_core::Vector3;
    use resona_graph::GraphManager;

    fn graph_with_environment() -> (GraphManager, usize, GlobalConfig) {
        let mut graph = GraphManager::new();
        let config = GlobalConfig::new(44_100, 64);
        let node = graph
            .add_node(
                Box::new(FreeFieldEnvironmentNode::new("s", config)),
                FreeFieldEnvironmentNode::spec(),
            )
            .unwrap();
        (graph, node, config)
    }

    /// Drive the node directly by delivering port values from a stub
    /// source node.
    struct Feeder {
        buffer: SampleBuffer,
        source: Transform,
        listener: Transform,
    }

    impl DspNode for Feeder {
        fn on_frame_tick(&mut self, ctx: &mut NodeContext) {
            ctx.send("sourceTransform", PortValue::Transform(self.source));
            ctx.send("listenerTransform", PortValue::Transform(self.listener));
            ctx.send("samples", PortValue::Samples(self.buffer.clone()));
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
            .exit("samples", PortKind::Samples)
            .exit("sourceTransform", PortKind::Transform)
            .exit("listenerTransform", PortKind::Transform)
    }

    #[test]
    fn test_distant_source_is_attenuated_and_delayed() {
        let (mut graph, node, config) = graph_with_environment();
        let feeder = graph
            .add_node(
                Box::new(Feeder {
                    buffer: SampleBuffer::from_samples(vec![1.0; config.buffer_size]),
                    source: Transform::from_position(Vector3::new(3.9, 0.0, 0.0)),
                    listener: Transform::from_position(Vector3::ZERO),
                }),
                feeder_spec(),
            )
            .unwrap();
        graph.connect(feeder, "samples", node, "samples");
        graph.connect(feeder, "sourceTransform", node, "sourceTransform");
        graph.connect(feeder, "listenerTransform", node, "listenerTransform");
        graph.register_source(feeder);
        graph.end_setup();

        // The propagation delay for 3.9 m is ~500 samples: the first
        // blocks are still silent.
        graph.process_frame();
        let first = graph
            .exit_value(node, "outSamples")
            .unwrap()
            .as_samples()
            .unwrap()
            .clone();
        assert!(first.is_silent());

        // Keep running until the wavefront arrives and the 100 ms gain
        // ramp converges; the steady-state gain for 3.9 m under the
        // inverse-square default is 0.5.
        for _ in 0..400 {
            graph.process_frame();
        }
        let settled = graph
            .exit_value(node, "outSamples")
            .unwrap()
            .as_samples()
            .unwrap()
            .clone();
        let last = settled[settled.len() - 1];
        assert!((last - 0.5).abs() < 0.01, "steady-state gain was {last}");
    }

    #[test]
    fn test_effective_transform_lags_the_source() {
        let (mut graph, node, config) = graph_with_environment();
        let feeder = graph
            .add_node(
                Box::new(Feeder {
                    buffer: SampleBuffer::new(config.buffer_size),
                    source: Transform::from_position(Vector3::new(34.3, 0.0, 0.0)),
                    listener: Transform::from_position(Vector3::ZERO),
                }),
                feeder_spec(),
            )
            .unwrap();
        graph.connect(feeder, "samples", node, "samples");
        graph.connect(feeder, "sourceTransform", node, "sourceTransform");
        graph.connect(feeder, "listenerTransform", node, "listenerTransform");
        graph.register_source(feeder);
        graph.end_setup();

        graph.process_frame();

        // Move the source; the effective position must keep reporting the
        // old location until the propagation delay has elapsed.
        graph.with_node::<Feeder, _>(feeder, |feeder, _| {
            feeder.source = Transform::from_position(Vector3::new(34.3, 10.0, 0.0));
        });
        graph.process_frame();
        let effective = graph
            .exit_value(node, "effectiveSourceTransform")
            .unwrap()
            .as_transform()
            .unwrap();
        assert!((effective.position().y - 0.0).abs() < 1e-3);
    }
}
