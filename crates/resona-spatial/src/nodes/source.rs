//! Sound source node

use std::any::Any;

use resona_core::{GlobalConfig, Quaternion, SampleBuffer, Transform};
use resona_graph::{Command, DspNode, NodeContext, NodeSpec, PortKind, PortValue};

/// What kind of emitter a source is. Virtual sources are the output
/// contract of external room models (image sources, scattering nodes)
/// that feed the same render chain as real sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    #[default]
    Simple,
    Directional,
    Virtual,
}

/// Holds the current mono block and transform of one source; every frame
/// tick publishes `samples`, `sourceTransform` and `sourceID`.
pub struct SourceNode {
    id: String,
    kind: SourceKind,
    config: GlobalConfig,
    transform: Transform,
    pending: Option<SampleBuffer>,
}

impl SourceNode {
    pub fn new(id: impl Into<String>, kind: SourceKind, config: GlobalConfig) -> Self {
        Self {
            id: id.into(),
            kind,
            config,
            transform: Transform::default(),
            pending: None,
        }
    }

    pub fn spec() -> NodeSpec {
        NodeSpec::new()
            .exit("samples", PortKind::Samples)
            .exit("sourceTransform", PortKind::Transform)
            .exit("sourceID", PortKind::Id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Hand the source its next block. An unset buffer plays silence.
    pub fn set_buffer(&mut self, buffer: SampleBuffer) {
        self.pending = Some(buffer);
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Publish the current transform and id without advancing audio.
    /// Used right after setup so downstream entry points hold a value
    /// before the first tick.
    pub fn publish_state(&self, ctx: &mut NodeContext) {
        ctx.send("sourceTransform", PortValue::Transform(self.transform));
        ctx.send("sourceID", PortValue::Id(self.id.clone()));
    }
}

impl DspNode for SourceNode {
    fn on_frame_tick(&mut self, ctx: &mut NodeContext) {
        // Transform first so the samples cascade sees a current position
        self.publish_state(ctx);
        let buffer = self
            .pending
            .take()
            .unwrap_or_else(|| SampleBuffer::new(self.config.buffer_size));
        ctx.send("samples", PortValue::Samples(buffer));
    }

    fn on_command(&mut self, command: &Command, ctx: &mut NodeContext) {
        if !command.is_for_source(&self.id) {
            return;
        }
        match command.command() {
            "/source/location" => {
                if let Some(location) = command.vector3_parameter("location") {
                    self.transform.set_position(location);
                    self.publish_state(ctx);
                }
            }
            "/source/orientation" => {
                if let Some(angles) = command.vector3_parameter("orientation") {
                    // [yaw, pitch, roll] in radians
                    self.transform
                        .set_orientation(Quaternion::from_yaw_pitch_roll(
                            angles.x, angles.y, angles.z,
                        ));
                    self.publish_state(ctx);
                }
            }
            "/source/orientationQuaternion" => {
                if let Some(orientation) = command.quaternion_parameter("orientation") {
                    self.transform.set_orientation(orientation.normalize());
                    self.publish_state(ctx);
                }
            }
            "/source/resetBuffers" => {
                self.pending = None;
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

    #[test]
    fn test_location_command_moves_the_source() {
        let mut graph = GraphManager::new();
        let config = GlobalConfig::new(44_100, 16);
        let id = graph
            .add_node(
                Box::new(SourceNode::new("steps", SourceKind::Simple, config)),
                SourceNode::spec(),
            )
            .unwrap();
        graph.end_setup();

        let command = Command::parse(
            r#"{"command": "/source/location", "sourceID": "steps", "location": [1.0, 2.0, 3.0]}"#,
        )
        .unwrap();
        graph.broadcast_command(command);

        let source = graph.node_ref::<SourceNode>(id).unwrap();
        assert_eq!(source.transform().position(), Vector3::new(1.0, 2.0, 3.0));

        // A command for another source is ignored
        let command = Command::parse(
            r#"{"command": "/source/location", "sourceID": "other", "location": [9.0, 9.0, 9.0]}"#,
        )
        .unwrap();
        graph.broadcast_command(command);
        let source = graph.node_ref::<SourceNode>(id).unwrap();
        assert_eq!(source.transform().position(), Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_tick_publishes_silence_without_a_buffer() {
        let mut graph = GraphManager::new();
        let config = GlobalConfig::new(44_100, 16);
        let id = graph
            .add_node(
                Box::new(SourceNode::new("s", SourceKind::Simple, config)),
                SourceNode::spec(),
            )
            .unwrap();
        graph.register_source(id);
        graph.end_setup();

        graph.process_frame();
        let value = graph.exit_value(id, "samples").unwrap();
        let buffer = value.as_samples().unwrap();
        assert_eq!(buffer.len(), 16);
        assert!(buffer.is_silent());
    }
}
