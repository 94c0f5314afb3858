//! Bilateral ambisonic encoder node
//!
//! Turns one source's mono block into two ambisonic channel sets, one per
//! ear, so interaural cues survive the ambisonic-domain convolution:
//! per-ear angles (with optional parallax correction), per-ear ITD by the
//! expansion-compression method, near-field compensation filters, then
//! spherical-harmonic encoding at each ear's direction.

use std::any::Any;

use resona_core::{
    record_error, CoreError, Ear, EarPair, GlobalConfig, SampleBuffer, DISTANCE_THRESHOLD_NEAR,
};
use resona_dsp::{process_add_delay, FilterChain};
use resona_graph::{Command, DspNode, NodeContext, NodeSpec, PortKind, PortValue};

use crate::ambisonic::{AmbisonicEncoder, AmbisonicNormalization, AmbisonicOrder};
use crate::hrtf::HrtfService;
use crate::nodes::lock_service;
use crate::relative_position::RelativePosition;
use crate::sos::SosFilterService;

pub struct BilateralEncoderNode {
    source_id: String,
    listener_id: String,
    config: GlobalConfig,
    encoder: AmbisonicEncoder,
    normalization: AmbisonicNormalization,
    delay_buffers: EarPair<Vec<f32>>,
    near_field_filters: EarPair<FilterChain>,
    /// Spatialization master switch: disabled means silent channels
    enabled: bool,
    itd_simulation: bool,
    near_field: bool,
    parallax_correction: bool,
}

impl BilateralEncoderNode {
    pub fn new(
        source_id: impl Into<String>,
        listener_id: impl Into<String>,
        config: GlobalConfig,
        order: AmbisonicOrder,
        normalization: AmbisonicNormalization,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            listener_id: listener_id.into(),
            config,
            encoder: AmbisonicEncoder::new(order, normalization),
            normalization,
            delay_buffers: EarPair::default(),
            near_field_filters: EarPair::new(
                FilterChain::with_stages(2),
                FilterChain::with_stages(2),
            ),
            enabled: true,
            itd_simulation: true,
            near_field: true,
            parallax_correction: true,
        }
    }

    pub fn spec() -> NodeSpec {
        NodeSpec::new()
            .entry("samples", PortKind::Samples, true)
            .entry("sourceTransform", PortKind::Transform, false)
            .entry("listenerTransform", PortKind::Transform, false)
            .entry("listenerHRTF", PortKind::HrtfRef, false)
            .entry("listenerSOS", PortKind::SosRef, false)
            .exit("leftChannels", PortKind::MultiSamples)
            .exit("rightChannels", PortKind::MultiSamples)
    }

    pub fn set_ambisonic_order(&mut self, order: AmbisonicOrder) {
        self.encoder = AmbisonicEncoder::new(order, self.normalization);
    }

    pub fn ambisonic_order(&self) -> AmbisonicOrder {
        self.encoder.order()
    }

    pub fn set_itd_simulation(&mut self, enabled: bool) {
        self.itd_simulation = enabled;
    }

    pub fn set_parallax_correction(&mut self, enabled: bool) {
        self.parallax_correction = enabled;
    }

    pub fn set_near_field(&mut self, enabled: bool) {
        self.near_field = enabled;
    }

    fn reset_buffers(&mut self) {
        self.delay_buffers.left.clear();
        self.delay_buffers.right.clear();
        self.near_field_filters.left.reset();
        self.near_field_filters.right.reset();
    }

    fn send_channels(
        &self,
        ctx: &mut NodeContext,
        left: Vec<SampleBuffer>,
        right: Vec<SampleBuffer>,
    ) {
        ctx.send("leftChannels", PortValue::MultiSamples(left));
        ctx.send("rightChannels", PortValue::MultiSamples(right));
    }
}

impl DspNode for BilateralEncoderNode {
    fn on_all_ready(&mut self, ctx: &mut NodeContext) {
        let mut left_channels = self.encoder.init_channels(self.config.buffer_size);
        let mut right_channels = self.encoder.init_channels(self.config.buffer_size);

        let Some(input) = ctx.input_samples("samples") else {
            self.send_channels(ctx, left_channels, right_channels);
            return;
        };
        debug_assert_eq!(input.len(), self.config.buffer_size, "buffer size mismatch");

        if !self.enabled {
            self.send_channels(ctx, left_channels, right_channels);
            return;
        }

        let Some(hrtf) = lock_service::<HrtfService>(
            ctx.input_service("listenerHRTF"),
            "listener HRTF",
        ) else {
            self.send_channels(ctx, left_channels, right_channels);
            return;
        };

        let source_transform = ctx.input_transform("sourceTransform").unwrap_or_default();
        let listener_transform = ctx.input_transform("listenerTransform").unwrap_or_default();
        let relative = RelativePosition::calculate(
            &source_transform,
            &listener_transform,
            &hrtf,
            self.parallax_correction,
        );

        // A source inside the head cannot be spatialised
        if relative.distance <= hrtf.head_radius() {
            record_error(CoreError::Warning(format!(
                "source {} is inside the listener's head",
                self.source_id
            )));
            self.send_channels(ctx, left_channels, right_channels);
            return;
        }

        // Interaural time difference, added click-free by frame
        // expansion/compression
        let (left_delay, right_delay) = if self.itd_simulation {
            hrtf.hrir_delays(relative.center_azimuth, relative.center_elevation)
        } else {
            (0, 0)
        };
        let mut left_ear = process_add_delay(&input, &mut self.delay_buffers.left, left_delay);
        let mut right_ear = process_add_delay(&input, &mut self.delay_buffers.right, right_delay);

        // Near-field compensation, bypassed beyond the threshold distance
        if self.near_field && relative.distance < DISTANCE_THRESHOLD_NEAR {
            if let Some(sos) = ctx
                .input_service("listenerSOS")
                .and_then(|weak| weak.upgrade())
                .and_then(|service| service.downcast::<SosFilterService>().ok())
            {
                for (ear, buffer) in [
                    (Ear::Left, &mut left_ear),
                    (Ear::Right, &mut right_ear),
                ] {
                    if let Some(coefficients) =
                        sos.coefficients(ear, relative.distance, relative.interaural_azimuth)
                    {
                        let filter = self.near_field_filters.get_mut(ear);
                        if filter.set_coefficients(&coefficients) {
                            filter.process(buffer);
                        }
                    }
                }
            }
        }

        self.encoder.encode(
            &left_ear,
            &mut left_channels,
            relative.left_azimuth,
            relative.left_elevation,
        );
        self.encoder.encode(
            &right_ear,
            &mut right_channels,
            relative.right_azimuth,
            relative.right_elevation,
        );
        self.send_channels(ctx, left_channels, right_channels);
    }

    fn on_command(&mut self, command: &Command, _ctx: &mut NodeContext) {
        if command.command() == "/source/resetBuffers" {
            if command.source_id() == Some(self.source_id.as_str()) {
                self.reset_buffers();
            }
            return;
        }

        if !command.is_for_listener(&self.listener_id) {
            return;
        }
        let enable = command.bool_parameter("enable");
        match command.command() {
            "/listener/enableSpatialization" => {
                if let Some(enable) = enable {
                    self.enabled = enable;
                }
            }
            "/listener/enableITDSimulation" => {
                if let Some(enable) = enable {
                    self.itd_simulation = enable;
                    if !enable {
                        self.delay_buffers.left.clear();
                        self.delay_buffers.right.clear();
                    }
                }
            }
            "/listener/enableParallaxCorrection" => {
                if let Some(enable) = enable {
                    self.parallax_correction = enable;
                }
            }
            "/nearFieldProcessor/enable" | "/bilateralAmbisonicsEncoder/enableNearFieldEffect" => {
                if let Some(enable) = enable {
                    self.near_field = enable;
                }
            }
            "/listener/setAmbisonicOrder" => {
                if let Some(order) = command
                    .int_parameter("order")
                    .and_then(|order| AmbisonicOrder::from_order(order as usize).ok())
                {
                    self.set_ambisonic_order(order);
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
