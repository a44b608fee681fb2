//! # Pitch Detection Module
//!
//! Time-domain autocorrelation pitch detection for a single buffer of
//! mono samples. The search is restricted to the lags that correspond to
//! the configured frequency band, which keeps the cost to
//! `O((max_lag - min_lag) * N)` multiply-adds and avoids a per-buffer FFT.
//!
//! ## Pipeline
//! 1. Map the frequency band to a lag range
//! 2. Raw (unnormalized) autocorrelation over that range
//! 3. Left-to-right local-maximum scan keeping the best peak so far
//! 4. Threshold gate on the raw correlation value
//! 5. Parabolic interpolation for sub-sample accuracy
//! 6. Band re-check on the refined frequency
//!
//! The threshold is compared against unnormalized correlation, so it scales
//! with signal energy: a quiet voice needs a lower threshold than a loud one.

use std::fmt;
use std::ops::Range;

use crate::config::DetectorConfig;
use crate::error::Result;

/// Why a buffer produced no pitch. Silence and noise are expected, so
/// none of these are errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// The sample rate was zero, negative or not finite.
    InvalidSampleRate,
    /// The buffer cannot hold two periods of the lowest analyzed frequency,
    /// or the band maps to an empty lag range at this sample rate.
    BufferTooShort { len: usize, required: usize },
    /// The correlation has no local maximum inside the lag range.
    NoPeak,
    /// The best peak did not exceed the configured threshold.
    BelowThreshold { peak: f64 },
    /// The refined frequency fell outside the configured band.
    OutOfRange { frequency: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::InvalidSampleRate => write!(f, "invalid sample rate"),
            Rejection::BufferTooShort { len, required } => {
                write!(f, "buffer of {len} samples is shorter than {required}")
            }
            Rejection::NoPeak => write!(f, "no correlation peak"),
            Rejection::BelowThreshold { peak } => {
                write!(f, "peak correlation {peak} below threshold")
            }
            Rejection::OutOfRange { frequency } => {
                write!(f, "{frequency} Hz is outside the analyzed band")
            }
        }
    }
}

/// Single-buffer autocorrelation pitch detector.
///
/// Holds only its validated configuration, so one instance can be shared
/// across threads and every call is independent.
#[derive(Debug, Clone)]
pub struct AutocorrelationDetector {
    config: DetectorConfig,
}

impl AutocorrelationDetector {
    /// Creates a detector, rejecting an invalid configuration up front.
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Estimates the fundamental frequency of `samples` in Hz.
    ///
    /// # Returns
    /// * `Some(frequency)` - Detected frequency within the configured band
    /// * `None` - Silence, noise, or a buffer too short to analyze
    pub fn detect(&self, samples: &[f32], sample_rate: f64) -> Option<f64> {
        self.analyze(samples, sample_rate).ok()
    }

    /// Like [`detect`](Self::detect), but reports why a buffer was rejected.
    ///
    /// A buffer of `N` samples is analyzed only when `max_lag < N / 2` with
    /// real-valued halving, so an odd `N = 2 * max_lag + 1` is accepted.
    pub fn analyze(
        &self,
        samples: &[f32],
        sample_rate: f64,
    ) -> std::result::Result<f64, Rejection> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(Rejection::InvalidSampleRate);
        }

        let lags = lag_range(sample_rate, &self.config);
        let span = lags.end.checked_mul(2);
        if lags.start >= lags.end || span.is_none_or(|span| span >= samples.len()) {
            return Err(Rejection::BufferTooShort {
                len: samples.len(),
                required: lags.end.saturating_mul(2).saturating_add(1),
            });
        }

        let correlation = autocorrelation(samples, lags.clone());
        let (index, peak) = select_peak(&correlation).ok_or(Rejection::NoPeak)?;

        // Exclusive: a peak sitting exactly on the threshold is rejected.
        if peak <= self.config.correlation_threshold {
            return Err(Rejection::BelowThreshold { peak });
        }

        let best_lag = (lags.start + index) as f64;
        let refined_lag = match parabolic_offset(
            correlation[index - 1],
            correlation[index],
            correlation[index + 1],
        ) {
            Some(offset) => best_lag + offset,
            None => best_lag,
        };
        let frequency = sample_rate / refined_lag;

        if !frequency.is_finite()
            || frequency < self.config.min_frequency
            || frequency > self.config.max_frequency
        {
            return Err(Rejection::OutOfRange { frequency });
        }

        Ok(frequency)
    }
}

/// Lags to search for a band: `floor(sr / max_frequency)` up to, but not
/// including, `floor(sr / min_frequency)`.
pub fn lag_range(sample_rate: f64, config: &DetectorConfig) -> Range<usize> {
    let min_lag = (sample_rate / config.max_frequency).floor() as usize;
    let max_lag = (sample_rate / config.min_frequency).floor() as usize;
    min_lag..max_lag
}

/// Raw autocorrelation `sum(s[i] * s[i + lag])` for every lag in `lags`.
///
/// Element `k` of the result belongs to lag `lags.start + k`. Lags at or
/// beyond the buffer length correlate to zero.
pub fn autocorrelation(samples: &[f32], lags: Range<usize>) -> Vec<f64> {
    lags.map(|lag| {
        let shifted = samples.get(lag..).unwrap_or(&[]);
        samples
            .iter()
            .zip(shifted)
            .map(|(&a, &b)| a as f64 * b as f64)
            .sum::<f64>()
    })
    .collect()
}

/// Scans `correlation` left to right for strict local maxima and returns the
/// index and value of the largest one.
///
/// A later peak only replaces the current best when it is strictly greater,
/// so among equal peaks the lowest lag (highest frequency) wins. The first
/// and last elements can never be peaks, which guarantees both neighbours
/// exist for interpolation.
pub fn select_peak(correlation: &[f64]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, window) in correlation.windows(3).enumerate() {
        let (prev, value, next) = (window[0], window[1], window[2]);
        if value > prev && value > next && best.is_none_or(|(_, b)| value > b) {
            best = Some((i + 1, value));
        }
    }
    best
}

/// Vertex offset of the parabola through three equally spaced points,
/// relative to the middle one.
///
/// Returns `None` when the points are collinear and no vertex exists.
pub fn parabolic_offset(y0: f64, y1: f64, y2: f64) -> Option<f64> {
    let denom = 2.0 * (y0 - 2.0 * y1 + y2);
    if denom == 0.0 {
        None
    } else {
        Some((y0 - y2) / denom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const SAMPLE_RATE: f64 = 44100.0;

    fn sine(frequency: f64, len: usize, amplitude: f64) -> Vec<f32> {
        (0..len)
            .map(|i| (amplitude * (2.0 * PI * frequency * i as f64 / SAMPLE_RATE).sin()) as f32)
            .collect()
    }

    fn detector() -> AutocorrelationDetector {
        AutocorrelationDetector::new(DetectorConfig::default()).unwrap()
    }

    #[test]
    fn detects_pure_sines_within_one_percent() {
        let detector = detector();
        for &frequency in &[100.0, 110.0, 220.0, 440.0, 880.0] {
            let detected = detector
                .detect(&sine(frequency, 4096, 0.5), SAMPLE_RATE)
                .unwrap_or_else(|| panic!("no pitch for {frequency} Hz"));
            let error = (detected - frequency).abs() / frequency;
            assert!(error < 0.01, "expected ~{frequency} Hz, got {detected} Hz");
        }
    }

    #[test]
    fn detects_harmonic_rich_tone_at_fundamental() {
        let samples: Vec<f32> = (0..4096)
            .map(|i| {
                let t = i as f64 / SAMPLE_RATE;
                (0.5 * (2.0 * PI * 196.0 * t).sin()
                    + 0.3 * (2.0 * PI * 392.0 * t).sin()
                    + 0.2 * (2.0 * PI * 588.0 * t).sin()) as f32
            })
            .collect();
        let detected = detector().detect(&samples, SAMPLE_RATE).unwrap();
        assert!((detected - 196.0).abs() < 1.96, "got {detected}");
    }

    #[test]
    fn silence_yields_no_detection() {
        let silence = vec![0.0f32; 4096];
        assert_eq!(detector().analyze(&silence, SAMPLE_RATE), Err(Rejection::NoPeak));
    }

    #[test]
    fn undersized_buffer_is_rejected_without_panicking() {
        // max_lag for 80 Hz at 44.1 kHz is 551, so 1102 samples is too short.
        let detector = detector();
        for len in [0, 1, 2, 500, 1102] {
            let result = detector.analyze(&sine(440.0, len, 0.5), SAMPLE_RATE);
            assert!(
                matches!(result, Err(Rejection::BufferTooShort { .. })),
                "len {len}: {result:?}"
            );
        }
        assert!(detector.analyze(&sine(440.0, 1103, 0.5), SAMPLE_RATE).is_ok());
    }

    #[test]
    fn vanishing_min_frequency_is_rejected_without_overflow() {
        // sr / 1e-300 saturates max_lag to usize::MAX.
        let detector =
            AutocorrelationDetector::new(DetectorConfig::with_band(1e-300, 1000.0)).unwrap();
        match detector.analyze(&vec![0.1; 4096], SAMPLE_RATE) {
            Err(Rejection::BufferTooShort { len, required }) => {
                assert_eq!(len, 4096);
                assert_eq!(required, usize::MAX);
            }
            other => panic!("expected short-buffer rejection, got {other:?}"),
        }
    }

    #[test]
    fn band_that_maps_to_no_lags_is_rejected() {
        // At 1 kHz both bounds floor to lag 1.
        let detector =
            AutocorrelationDetector::new(DetectorConfig::with_band(900.0, 1000.0)).unwrap();
        let result = detector.analyze(&[0.5; 64], 1000.0);
        assert!(matches!(result, Err(Rejection::BufferTooShort { .. })));
    }

    #[test]
    fn invalid_sample_rate_is_rejected() {
        let detector = detector();
        let samples = sine(440.0, 4096, 0.5);
        assert_eq!(detector.analyze(&samples, 0.0), Err(Rejection::InvalidSampleRate));
        assert_eq!(detector.analyze(&samples, -44100.0), Err(Rejection::InvalidSampleRate));
        assert_eq!(detector.analyze(&samples, f64::NAN), Err(Rejection::InvalidSampleRate));
    }

    #[test]
    fn peak_exactly_at_threshold_is_rejected() {
        let samples = sine(440.0, 4096, 0.5);
        let base = DetectorConfig::default();
        let correlation = autocorrelation(&samples, lag_range(SAMPLE_RATE, &base));
        let (_, peak) = select_peak(&correlation).unwrap();

        let at = AutocorrelationDetector::new(DetectorConfig {
            correlation_threshold: peak,
            ..base
        })
        .unwrap();
        assert_eq!(
            at.analyze(&samples, SAMPLE_RATE),
            Err(Rejection::BelowThreshold { peak })
        );

        let below = AutocorrelationDetector::new(DetectorConfig {
            correlation_threshold: peak * (1.0 - 1e-9),
            ..base
        })
        .unwrap();
        assert!(below.detect(&samples, SAMPLE_RATE).is_some());
    }

    #[test]
    fn threshold_is_amplitude_sensitive() {
        let detector = AutocorrelationDetector::new(DetectorConfig {
            correlation_threshold: 1.0,
            ..DetectorConfig::default()
        })
        .unwrap();
        let quiet = detector.analyze(&sine(440.0, 4096, 0.001), SAMPLE_RATE);
        assert!(matches!(quiet, Err(Rejection::BelowThreshold { .. })));
        assert!(detector.detect(&sine(440.0, 4096, 0.5), SAMPLE_RATE).is_some());
    }

    #[test]
    fn tone_below_band_has_no_peak() {
        let result = detector().analyze(&sine(60.0, 4096, 0.5), SAMPLE_RATE);
        assert_eq!(result, Err(Rejection::NoPeak));
    }

    #[test]
    fn refined_frequency_outside_band_is_rejected() {
        // 446 Hz maps to lag 98.88, so a peak at lag 99 can refine past the band.
        let detector =
            AutocorrelationDetector::new(DetectorConfig::with_band(400.0, 446.0)).unwrap();
        let result = detector.analyze(&sine(447.5, 4096, 0.5), SAMPLE_RATE);
        match result {
            Err(Rejection::OutOfRange { frequency }) => assert!(frequency > 446.0),
            other => panic!("expected out-of-range rejection, got {other:?}"),
        }
        assert!(detector.detect(&sine(440.0, 4096, 0.5), SAMPLE_RATE).is_some());
    }

    #[test]
    fn peak_selection_keeps_first_of_equal_peaks() {
        let correlation = [0.0, 3.0, 1.0, 3.0, 0.0];
        assert_eq!(select_peak(&correlation), Some((1, 3.0)));
    }

    #[test]
    fn peak_selection_moves_to_strictly_larger_later_peak() {
        let correlation = [0.0, 2.0, 1.0, 5.0, 0.0, 4.0, 0.0];
        assert_eq!(select_peak(&correlation), Some((3, 5.0)));
    }

    #[test]
    fn peak_selection_ignores_edges_and_plateaus() {
        assert_eq!(select_peak(&[5.0, 1.0, 0.0]), None);
        assert_eq!(select_peak(&[0.0, 1.0, 1.0, 0.0]), None);
        assert_eq!(select_peak(&[1.0, 2.0]), None);
        assert_eq!(select_peak(&[]), None);
    }

    #[test]
    fn parabolic_offset_finds_vertex() {
        // y = -(x - 0.25)^2 sampled at -1, 0, 1.
        let y = |x: f64| -(x - 0.25) * (x - 0.25);
        let offset = parabolic_offset(y(-1.0), y(0.0), y(1.0)).unwrap();
        assert!((offset - 0.25).abs() < 1e-12);
        assert_eq!(parabolic_offset(1.0, 2.0, 3.0), None);
    }

    #[test]
    fn autocorrelation_matches_direct_sum() {
        let samples = [1.0f32, 2.0, 3.0, 4.0];
        let correlation = autocorrelation(&samples, 0..6);
        assert_eq!(correlation, vec![30.0, 20.0, 11.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn rejects_invalid_configuration_at_construction() {
        assert!(AutocorrelationDetector::new(DetectorConfig::with_band(1000.0, 80.0)).is_err());
    }
}
