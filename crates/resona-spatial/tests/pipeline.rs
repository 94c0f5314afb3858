//! End-to-end render pipeline scenarios: one or two sources through the
//! full graph (environment, bilateral encoder, ambisonic convolvers,
//! listener mix) against a Kronecker-delta HRTF.
//!
//! With a delta HRIR in every direction the spatialization chain is
//! acoustically transparent, so the expected output is the input scaled
//! by the distance gain, which makes the scenarios checkable to tight
//! tolerances.

use std::sync::Arc;

use rand::{rngs::StdRng, Rng, SeedableRng};

use resona_core::{GlobalConfig, SampleBuffer, Transform, Vector3};
use resona_spatial::{
    AmbisonicNormalization, AmbisonicOrder, BinauralRenderer, ExtrapolationMethod, HrirRecord,
    HrtfService, SosFilterService, SourceKind,
};

const BLOCK: usize = 512;
const SAMPLE_RATE: u32 = 44_100;
const IR_LENGTH: usize = 64;

fn test_config() -> GlobalConfig {
    GlobalConfig::new(SAMPLE_RATE, BLOCK)
}

/// An HRTF whose response is a unit impulse from every direction
fn delta_hrtf(config: GlobalConfig) -> Arc<HrtfService> {
    let mut service = HrtfService::new(config);
    service.set_grid_sampling_step(15);
    service
        .begin_setup(IR_LENGTH, ExtrapolationMethod::NearestPoint)
        .unwrap();
    let mut impulse = vec![0.0; IR_LENGTH];
    impulse[0] = 1.0;
    service.add_hrir(0.0, 0.0, 1.95, HrirRecord::new(impulse.clone(), impulse));
    service.end_setup().unwrap();
    Arc::new(service)
}

/// Near-field service whose first stage is a pure gain of 2, so its
/// effect on the signal is unmistakable.
fn doubling_sos() -> Arc<SosFilterService> {
    let mut service = SosFilterService::new(test_config());
    service.begin_setup().unwrap();
    let coefficients = |gain: f32| -> Vec<f32> {
        vec![
            gain, 0.0, 0.0, 1.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, 1.0, 0.0, 0.0,
        ]
    };
    for &distance in &[0.2f32, 1.0, 1.9] {
        for &azimuth in &[-90.0f32, 0.0, 90.0] {
            let pair = resona_core::EarPair::new(coefficients(2.0), coefficients(2.0));
            service.add_coefficients(distance, azimuth, pair);
        }
    }
    service.end_setup().unwrap();
    Arc::new(service)
}

fn single_source_renderer(
    source_position: Vector3,
    sos: Option<Arc<SosFilterService>>,
) -> BinauralRenderer {
    let config = test_config();
    let mut renderer = BinauralRenderer::new(config);
    renderer
        .add_listener(
            "listener",
            delta_hrtf(config),
            sos,
            AmbisonicOrder::First,
            AmbisonicNormalization::N3d,
        )
        .unwrap();
    renderer.add_source("source", SourceKind::Simple).unwrap();
    renderer.end_setup();

    renderer.set_listener_transform("listener", Transform::default());
    renderer.set_source_transform("source", Transform::from_position(source_position));
    renderer
}

fn run_frame(renderer: &mut BinauralRenderer, input: &SampleBuffer) -> (SampleBuffer, SampleBuffer) {
    renderer.set_source_buffer("source", input.clone());
    renderer.process_frame();
    renderer.listener_output("listener").unwrap()
}

#[test]
fn single_source_on_axis_reaches_the_distance_gain() {
    let _ = env_logger::builder().is_test(true).try_init();

    // Source 1 m ahead; with the 1.95 m reference distance the expected
    // steady-state gain is 1.95 on both ears.
    let mut renderer = single_source_renderer(Vector3::new(1.0, 0.0, 0.0), None);
    // Remove the propagation delay so the expectation is purely the gain
    renderer.send_command(r#"{"command": "/environment/enablePropagationDelay", "enable": false}"#);

    let input = SampleBuffer::from_samples(vec![1.0; BLOCK]);
    let mut last = (SampleBuffer::new(BLOCK), SampleBuffer::new(BLOCK));
    // Run past the 100 ms attenuation ramp
    for _ in 0..60 {
        last = run_frame(&mut renderer, &input);
    }

    let (left, right) = last;
    let left_tail = left[BLOCK - 1];
    let right_tail = right[BLOCK - 1];
    assert!(
        (left_tail - 1.95).abs() < 0.02,
        "left settled at {left_tail}, expected 1.95"
    );
    assert!(
        (right_tail - 1.95).abs() < 0.02,
        "right settled at {right_tail}, expected 1.95"
    );
}

#[test]
fn reset_buffers_silences_within_two_blocks() {
    let mut renderer = single_source_renderer(Vector3::new(1.0, 0.0, 0.0), None);

    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..20 {
        let noise: Vec<f32> = (0..BLOCK).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect();
        run_frame(&mut renderer, &SampleBuffer::from_samples(noise));
    }

    renderer.send_command(r#"{"command": "/source/resetBuffers", "sourceID": "source"}"#);

    // With one partition per filter, the spectral history flushes after
    // P + 1 = 2 zero blocks; from then on the output is exactly zero.
    let zeros = SampleBuffer::new(BLOCK);
    let mut outputs = Vec::new();
    for _ in 0..3 {
        outputs.push(run_frame(&mut renderer, &zeros));
    }
    let (left, right) = &outputs[2];
    assert!(left.is_silent(), "left ear still carries signal after reset");
    assert!(right.is_silent(), "right ear still carries signal after reset");
}

#[test]
fn near_field_filters_engage_only_inside_the_threshold() {
    let input = SampleBuffer::from_samples(vec![0.5; BLOCK]);

    // Beyond 1.95 m the compensation is bypassed: output with and
    // without the service is identical.
    let far = Vector3::new(3.0, 0.0, 0.0);
    let mut with_sos = single_source_renderer(far, Some(doubling_sos()));
    let mut without_sos = single_source_renderer(far, None);
    with_sos.send_command(r#"{"command": "/environment/enablePropagationDelay", "enable": false}"#);
    without_sos
        .send_command(r#"{"command": "/environment/enablePropagationDelay", "enable": false}"#);

    for _ in 0..20 {
        let (left_a, _) = run_frame(&mut with_sos, &input);
        let (left_b, _) = run_frame(&mut without_sos, &input);
        assert_eq!(left_a, left_b);
    }

    // Inside the threshold the doubling filter is audible
    let near = Vector3::new(1.0, 0.0, 0.0);
    let mut with_sos = single_source_renderer(near, Some(doubling_sos()));
    let mut without_sos = single_source_renderer(near, None);
    with_sos.send_command(r#"{"command": "/environment/enablePropagationDelay", "enable": false}"#);
    without_sos
        .send_command(r#"{"command": "/environment/enablePropagationDelay", "enable": false}"#);

    let mut doubled = (SampleBuffer::new(BLOCK), SampleBuffer::new(BLOCK));
    let mut plain = (SampleBuffer::new(BLOCK), SampleBuffer::new(BLOCK));
    for _ in 0..60 {
        doubled = run_frame(&mut with_sos, &input);
        plain = run_frame(&mut without_sos, &input);
    }
    let ratio = doubled.0[BLOCK - 1] / plain.0[BLOCK - 1];
    assert!(
        (ratio - 2.0).abs() < 0.05,
        "near-field gain ratio was {ratio}, expected 2"
    );
}

#[test]
fn ambisonic_order_switch_recovers_after_the_transient() {
    let mut renderer = single_source_renderer(Vector3::new(1.0, 0.0, 0.0), None);
    renderer.send_command(r#"{"command": "/environment/enablePropagationDelay", "enable": false}"#);

    let input = SampleBuffer::from_samples(vec![1.0; BLOCK]);
    for _ in 0..60 {
        run_frame(&mut renderer, &input);
    }

    // Switch the runtime order; the convolver history is discarded and
    // the chain re-settles on the same steady state.
    renderer.send_command(
        r#"{"command": "/listener/setAmbisonicOrder", "listenerID": "listener", "order": 2}"#,
    );
    let mut last = (SampleBuffer::new(BLOCK), SampleBuffer::new(BLOCK));
    for _ in 0..10 {
        last = run_frame(&mut renderer, &input);
    }
    let settled = last.0[BLOCK - 1];
    assert!(
        (settled - 1.95).abs() < 0.02,
        "after the order switch the left ear settled at {settled}"
    );
}

#[test]
fn every_listener_emits_exactly_one_block_per_frame() {
    let config = test_config();
    let mut renderer = BinauralRenderer::new(config);
    renderer
        .add_listener(
            "listener",
            delta_hrtf(config),
            None,
            AmbisonicOrder::First,
            AmbisonicNormalization::N3d,
        )
        .unwrap();
    renderer.add_source("alpha", SourceKind::Simple).unwrap();
    renderer.add_source("beta", SourceKind::Virtual).unwrap();
    renderer.end_setup();

    renderer.set_source_transform("alpha", Transform::from_position(Vector3::new(2.0, 1.0, 0.0)));
    renderer.set_source_transform("beta", Transform::from_position(Vector3::new(2.0, -1.0, 0.0)));

    let input = SampleBuffer::from_samples(vec![0.25; BLOCK]);
    for _ in 0..5 {
        renderer.set_source_buffer("alpha", input.clone());
        renderer.set_source_buffer("beta", input.clone());
        renderer.process_frame();
        let (left, right) = renderer.listener_output("listener").unwrap();
        assert_eq!(left.len(), BLOCK);
        assert_eq!(right.len(), BLOCK);
    }
}

#[test]
fn sources_can_be_removed_during_a_setup_phase() {
    let config = test_config();
    let mut renderer = BinauralRenderer::new(config);
    renderer
        .add_listener(
            "listener",
            delta_hrtf(config),
            None,
            AmbisonicOrder::First,
            AmbisonicNormalization::N3d,
        )
        .unwrap();
    renderer.add_source("keep", SourceKind::Simple).unwrap();
    renderer.add_source("drop", SourceKind::Simple).unwrap();
    renderer.end_setup();

    // Removal is rejected while running
    assert!(renderer.remove_source("drop").is_err());

    renderer.begin_setup();
    renderer.remove_source("drop").unwrap();
    renderer.end_setup();

    renderer.set_source_transform("keep", Transform::from_position(Vector3::new(1.5, 0.0, 0.0)));
    renderer.set_source_buffer("keep", SampleBuffer::from_samples(vec![0.5; BLOCK]));
    renderer.process_frame();
    let (left, _) = renderer.listener_output("listener").unwrap();
    assert_eq!(left.len(), BLOCK);
}
