//! End-to-end: a producer thread feeds frames through a `ChannelSource`
//! into the controller while the test thread reads estimates.

use pitch_core::{
    ChannelSource, ControllerConfig, ControllerState, Dispatch, MissPolicy,
    PitchStreamController, SourceFormat,
};
use std::f64::consts::PI;
use std::time::Duration;

const SAMPLE_RATE: f64 = 48000.0;
const FRAME: usize = 2048;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("pitch_core=debug")
        .try_init();
}

fn tone(frequency: f64, frame: usize) -> Vec<f32> {
    let offset = frame * FRAME;
    (0..FRAME)
        .map(|i| {
            let t = (offset + i) as f64 / SAMPLE_RATE;
            (0.4 * (2.0 * PI * frequency * t).sin()) as f32
        })
        .collect()
}

fn recv_note(updates: &crossbeam_channel::Receiver<pitch_core::EstimateUpdate>) -> Option<String> {
    updates
        .recv_timeout(Duration::from_secs(5))
        .ok()
        .and_then(|update| update.estimate)
        .map(|estimate| estimate.note_name)
}

#[test]
fn follows_a_sung_scale_across_threads() {
    init_tracing();
    let (frames, source) = ChannelSource::unbounded(SourceFormat::mono(SAMPLE_RATE));
    let mut controller = PitchStreamController::new(ControllerConfig::default()).unwrap();
    let updates = controller.subscribe(64);
    controller.start(Box::new(source)).unwrap();
    assert_eq!(controller.state(), ControllerState::Detecting);

    // C4, E4, G4
    for (i, frequency) in [261.63, 329.63, 392.0].into_iter().enumerate() {
        frames.send(tone(frequency, i)).unwrap();
    }

    assert_eq!(recv_note(&updates).as_deref(), Some("C4"));
    assert_eq!(recv_note(&updates).as_deref(), Some("E4"));
    assert_eq!(recv_note(&updates).as_deref(), Some("G4"));

    let latest = controller.handle().latest().unwrap();
    assert!((latest.frequency_hz - 392.0).abs() / 392.0 < 0.01);
    assert!(latest.is_in_tune);

    controller.stop();
    assert!(controller.latest().is_none());
    assert_eq!(controller.handle().state(), ControllerState::Idle);
}

#[test]
fn silence_between_phrases_is_waiting_not_error() {
    init_tracing();
    let (frames, source) = ChannelSource::unbounded(SourceFormat::mono(SAMPLE_RATE));
    let mut controller = PitchStreamController::new(ControllerConfig {
        miss_policy: MissPolicy::Clear,
        ..ControllerConfig::default()
    })
    .unwrap();
    let updates = controller.subscribe(16);
    controller.start(Box::new(source)).unwrap();

    frames.send(tone(440.0, 0)).unwrap();
    frames.send(vec![0.0; FRAME]).unwrap();
    frames.send(tone(440.0, 2)).unwrap();

    assert_eq!(recv_note(&updates).as_deref(), Some("A4"));
    let cleared = updates.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(cleared.estimate.is_none());
    assert_eq!(recv_note(&updates).as_deref(), Some("A4"));

    let stats = controller.stats();
    assert_eq!(stats.buffers_analyzed, 3);
    assert_eq!(stats.detections, 2);
    assert_eq!(stats.rejections, 1);
}

#[test]
fn worker_dispatch_end_to_end() {
    init_tracing();
    let (frames, source) = ChannelSource::unbounded(SourceFormat::mono(SAMPLE_RATE));
    let mut controller = PitchStreamController::new(ControllerConfig {
        dispatch: Dispatch::Worker { queue_depth: 8 },
        ..ControllerConfig::default()
    })
    .unwrap();
    let updates = controller.subscribe(16);
    controller.start(Box::new(source)).unwrap();

    frames.send(tone(196.0, 0)).unwrap();
    assert_eq!(recv_note(&updates).as_deref(), Some("G3"));

    controller.stop();
    controller.stop();
    assert!(controller.latest().is_none());
}
