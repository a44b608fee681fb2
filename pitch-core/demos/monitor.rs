//! Console pitch monitor: listens on the default microphone and prints the
//! latest estimate ten times per second.
//!
//! Run with `cargo run -p pitch-core --example monitor --features capture`,
//! optionally passing a JSON controller config path.

use anyhow::{Context, Result};
use pitch_core::capture::CpalSource;
use pitch_core::{ControllerConfig, PitchStreamController};
use std::time::Duration;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ControllerConfig::load(&path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None => ControllerConfig::default(),
    };

    let mut controller = PitchStreamController::new(config)?;
    let source = CpalSource::default_input()?;
    controller.start(Box::new(source))?;

    let handle = controller.handle();
    loop {
        match handle.latest() {
            Some(estimate) => println!(
                "{:>4} {:8.2} Hz {:+6.1} cents {}",
                estimate.note_name,
                estimate.frequency_hz,
                estimate.cents_deviation,
                if estimate.is_in_tune { "in tune" } else { "" }
            ),
            None => println!("waiting..."),
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}
