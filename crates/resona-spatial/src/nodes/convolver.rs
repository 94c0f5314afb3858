//! Ambisonic-domain convolver node, one instance per listener ear
//!
//! Sums the encoded channel sets of every connected source (the entry
//! point's multiplicity barrier counts them), convolves each ambisonic
//! channel against the ear's channel filter from the ambisonic BIR, mixes
//! the channel spectra and inverse-transforms once into the ear's block.

use std::any::Any;

use rustfft::num_complex::Complex;

use resona_core::{record_error, CoreError, Ear, GlobalConfig, SampleBuffer};
use resona_dsp::UniformPartitionedConvolver;
use resona_graph::{Command, DspNode, NodeContext, NodeSpec, PortKind, PortValue};

use crate::ambisonic::{AmbisonicBir, AmbisonicOrder};
use crate::nodes::lock_service;

pub struct AmbisonicConvolverNode {
    listener_id: String,
    ear: Ear,
    config: GlobalConfig,
    channel_count: usize,
    convolvers: Vec<UniformPartitionedConvolver>,
    /// Channel sets summed over the sources delivered this frame
    accumulated: Vec<SampleBuffer>,
    enabled: bool,
}

impl AmbisonicConvolverNode {
    pub fn new(
        listener_id: impl Into<String>,
        ear: Ear,
        config: GlobalConfig,
        order: AmbisonicOrder,
    ) -> Self {
        Self {
            listener_id: listener_id.into(),
            ear,
            config,
            channel_count: order.channel_count(),
            convolvers: Vec::new(),
            accumulated: Vec::new(),
            enabled: true,
        }
    }

    pub fn spec() -> NodeSpec {
        NodeSpec::new()
            .entry("inputChannels", PortKind::MultiSamples, true)
            .entry("listenerABIR", PortKind::AbirRef, false)
            .exit("outSamples", PortKind::Samples)
    }

    pub fn ear(&self) -> Ear {
        self.ear
    }

    /// Switch the runtime ambisonic order. The convolution history is
    /// discarded: the next few frames ramp the new order in.
    pub fn set_ambisonic_order(&mut self, order: AmbisonicOrder) {
        self.channel_count = order.channel_count();
        self.convolvers.clear();
        self.accumulated.clear();
    }

    /// Drop all convolution state
    pub fn reset_buffers(&mut self) {
        for convolver in &mut self.convolvers {
            convolver.reset();
        }
        self.accumulated.clear();
    }

    fn send_silence(&self, ctx: &mut NodeContext) {
        ctx.send(
            "outSamples",
            PortValue::Samples(SampleBuffer::new(self.config.buffer_size)),
        );
    }
}

impl DspNode for AmbisonicConvolverNode {
    fn on_data_received(&mut self, entry_id: &str, ctx: &mut NodeContext) {
        if entry_id != "inputChannels" {
            return;
        }
        let Some(channels) = ctx.input_multi_samples("inputChannels") else {
            return;
        };
        if self.accumulated.len() != channels.len() {
            self.accumulated = channels;
            return;
        }
        for (sum, channel) in self.accumulated.iter_mut().zip(channels.iter()) {
            sum.add(channel);
        }
    }

    fn on_all_ready(&mut self, ctx: &mut NodeContext) {
        let channels = std::mem::take(&mut self.accumulated);

        if !self.enabled {
            self.send_silence(ctx);
            return;
        }

        let Some(abir) = lock_service::<AmbisonicBir>(
            ctx.input_service("listenerABIR"),
            "listener ambisonic BIR",
        ) else {
            self.send_silence(ctx);
            return;
        };

        if channels.len() != self.channel_count {
            record_error(CoreError::BadSize(format!(
                "expected {} ambisonic channels, got {}; the ambisonic order probably changed mid-stream",
                self.channel_count,
                channels.len()
            )));
            self.send_silence(ctx);
            return;
        }

        if self.convolvers.len() != self.channel_count
            || self
                .convolvers
                .first()
                .is_some_and(|c| c.partition_count() != abir.partition_count())
        {
            self.convolvers = (0..self.channel_count)
                .map(|_| {
                    UniformPartitionedConvolver::new(
                        self.config.buffer_size,
                        abir.partition_count(),
                    )
                })
                .collect();
        }

        // Convolve every channel and mix in the frequency domain; a
        // single inverse transform produces the ear block.
        let spectrum_len = self.config.buffer_size + 1;
        let mut mixed = vec![Complex::new(0.0, 0.0); spectrum_len];
        for (channel_index, (channel, convolver)) in
            channels.iter().zip(self.convolvers.iter_mut()).enumerate()
        {
            let Some(partitions) = abir.channel_partitions(channel_index, self.ear) else {
                record_error(CoreError::BadSize(
                    "ambisonic BIR has fewer channels than the running order".into(),
                ));
                self.send_silence(ctx);
                return;
            };
            let spectrum = convolver.process_to_spectrum(channel.as_slice(), partitions);
            for (sum, value) in mixed.iter_mut().zip(spectrum.iter()) {
                *sum += value;
            }
        }

        let scale = 1.0 / abir.channel_count() as f32;
        for value in &mut mixed {
            *value *= scale;
        }

        let output = self.convolvers[0].inverse_transform(mixed);
        ctx.send("outSamples", PortValue::Samples(output));
    }

    fn on_command(&mut self, command: &Command, _ctx: &mut NodeContext) {
        if !command.is_for_listener(&self.listener_id) {
            return;
        }
        match command.command() {
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
            "/listener/enableSpatialization" => {
                if let Some(enable) = command.bool_parameter("enable") {
                    self.enabled = enable;
                    if !enable {
                        self.reset_buffers();
                    }
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
