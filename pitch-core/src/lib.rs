// pitch-core/src/lib.rs

//! Real-time pitch detection for a live singing voice.
//! This crate turns buffers of mono samples into a frequency, the nearest
//! note name and the deviation in cents, and runs that analysis against a
//! sample source on the source's own thread. It is completely headless
//! and contains no UI code.

pub mod config;
pub mod controller;
pub mod error;
pub mod pitch;
pub mod source;
pub mod tuning;

#[cfg(feature = "capture")]
pub mod capture;

use serde::{Deserialize, Serialize};

pub use config::{ControllerConfig, DetectorConfig, Dispatch, MissPolicy};
pub use controller::{
    ControllerState, ControllerStats, EstimateHandle, EstimateUpdate, PitchStreamController,
};
pub use error::{Error, Result};
pub use pitch::{AutocorrelationDetector, Rejection};
pub use source::{BufferSink, ChannelSource, SampleSource, SourceFormat};

/// The pitch detected in a single buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitchEstimate {
    /// Detected fundamental frequency in Hz.
    pub frequency_hz: f64,
    /// Nearest MIDI note number.
    pub midi_note: i32,
    /// Name of the nearest note, e.g. "A4".
    pub note_name: String,
    /// Signed deviation from the nearest note in cents.
    pub cents_deviation: f64,
    /// Whether the deviation is within the in-tune window.
    pub is_in_tune: bool,
}

impl PitchEstimate {
    /// Maps a detected frequency onto the equal-tempered scale.
    pub fn from_frequency(frequency_hz: f64) -> Self {
        let midi_note = tuning::midi_note_for_frequency(frequency_hz);
        let cents_deviation = tuning::cents_deviation(frequency_hz, midi_note);
        Self {
            frequency_hz,
            midi_note,
            note_name: tuning::note_name_for_midi_note(midi_note),
            cents_deviation,
            is_in_tune: tuning::is_in_tune(cents_deviation),
        }
    }
}
