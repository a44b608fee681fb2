//! # Musical Tuning Module
//!
//! Conversions between frequency, MIDI note number, note name and cent
//! deviation in twelve-tone equal temperament, anchored at A4 = 440 Hz.
//!
//! Every function here is pure and can be called from any thread,
//! including the audio callback.

use serde::{Deserialize, Serialize};

/// Reference pitch for A4 in Hz.
pub const A4_FREQUENCY: f64 = 440.0;

/// MIDI note number of A4.
pub const A4_MIDI: i32 = 69;

/// Largest absolute cent deviation still reported as in tune.
pub const IN_TUNE_CENTS: f64 = 10.0;

/// Pitch-class names starting at C, using sharps.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// A single equal-tempered note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// MIDI note number (A4 = 69).
    pub midi: i32,
    /// Note name with octave (e.g., "A4", "C#3").
    pub name: String,
    /// Exact equal-tempered frequency in Hz.
    pub frequency: f64,
}

impl Note {
    /// Builds the note for a MIDI number.
    pub fn from_midi(midi: i32) -> Self {
        Self {
            midi,
            name: note_name_for_midi_note(midi),
            frequency: frequency_for_midi_note(midi),
        }
    }
}

/// Returns the MIDI note nearest to `frequency`.
///
/// `frequency` must be positive; the detector only ever produces
/// positive frequencies. Zero saturates to `i32::MIN`; negative or NaN
/// input maps to 0.
pub fn midi_note_for_frequency(frequency: f64) -> i32 {
    (A4_MIDI as f64 + 12.0 * (frequency / A4_FREQUENCY).log2()).round() as i32
}

/// Equal-tempered frequency of a MIDI note in Hz.
pub fn frequency_for_midi_note(midi: i32) -> f64 {
    A4_FREQUENCY * 2.0_f64.powf(midi.saturating_sub(A4_MIDI) as f64 / 12.0)
}

/// Note name with octave, e.g. `60 -> "C4"`, `69 -> "A4"`, `-1 -> "B-2"`.
pub fn note_name_for_midi_note(midi: i32) -> String {
    let pitch_class = midi.rem_euclid(12) as usize;
    let octave = midi.div_euclid(12) - 1;
    format!("{}{}", NOTE_NAMES[pitch_class], octave)
}

/// Deviation of `frequency` from the equal-tempered pitch of `midi`, in cents.
///
/// Positive values are sharp, negative values flat.
pub fn cents_deviation(frequency: f64, midi: i32) -> f64 {
    1200.0 * (frequency / frequency_for_midi_note(midi)).log2()
}

/// Finds the equal-tempered note closest to `frequency`.
pub fn nearest_note(frequency: f64) -> Note {
    Note::from_midi(midi_note_for_frequency(frequency))
}

/// Whether a cent deviation counts as in tune (inclusive at the boundary).
pub fn is_in_tune(cents: f64) -> bool {
    cents.abs() <= IN_TUNE_CENTS
}
