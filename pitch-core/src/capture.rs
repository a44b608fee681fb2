//! # Audio Capture Module
//!
//! Microphone input through CPAL (Cross-Platform Audio Library), exposed as
//! a [`SampleSource`].
//!
//! ## Features
//! - Default input device selection
//! - Prefers mono 32-bit float input near 44.1 kHz
//! - Downmixes multi-channel input to mono
//! - Frames the device's variable-sized callbacks into fixed-size buffers

use anyhow::{Context, Result, anyhow};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::source::{BufferSink, SampleSource, SourceFormat};

/// Samples per buffer handed to the sink.
///
/// 2048 samples is ~46ms at 44.1 kHz, enough for two periods of an 80 Hz
/// voice at sample rates up to 51.2 kHz.
pub const BUFFER_SIZE: usize = 2048;

/// Sample rate requested from the device when it supports a range.
pub const TARGET_SAMPLE_RATE: u32 = 44100;

/// Captures the default input device.
///
/// CPAL streams cannot move between threads on every platform, so the
/// stream is built and owned by a dedicated capture thread that lives
/// between [`start`](SampleSource::start) and [`stop`](SampleSource::stop).
pub struct CpalSource {
    format: SourceFormat,
    frame_size: usize,
    capture: Option<CaptureThread>,
}

struct CaptureThread {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

impl CpalSource {
    /// Probes the default input device and picks its stream format.
    pub fn default_input() -> Result<Self> {
        let (_, config) = open_default_input()?;
        Ok(Self {
            format: SourceFormat {
                sample_rate: config.sample_rate.0 as f64,
                channels: config.channels,
            },
            frame_size: BUFFER_SIZE,
            capture: None,
        })
    }

    /// Overrides the number of samples per delivered buffer.
    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size.max(1);
        self
    }
}

impl SampleSource for CpalSource {
    fn format(&self) -> SourceFormat {
        self.format
    }

    fn start(&mut self, sink: BufferSink) -> Result<()> {
        if self.capture.is_some() {
            return Err(anyhow!("capture is already running"));
        }

        let frame_size = self.frame_size;
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("pitch-capture".into())
            .spawn(move || {
                let stream = match build_stream(sink, frame_size) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Park until stop; dropping the stream ends the callbacks.
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("capture thread finished");
            })
            .context("failed to spawn capture thread")?;

        let ready = ready_rx
            .recv()
            .map_err(|_| anyhow!("capture thread exited before opening the device"))
            .and_then(|result| result);
        if let Err(err) = ready {
            let _ = handle.join();
            return Err(err);
        }

        self.capture = Some(CaptureThread {
            shutdown: shutdown_tx,
            handle,
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(capture) = self.capture.take() {
            let _ = capture.shutdown.send(());
            if capture.handle.join().is_err() {
                warn!("capture thread panicked");
            }
        }
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Selects the default input device and a stream configuration for it.
fn open_default_input() -> Result<(cpal::Device, cpal::StreamConfig)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, TARGET_SAMPLE_RATE)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let rate = TARGET_SAMPLE_RATE
        .clamp(supported_config.min_sample_rate().0, supported_config.max_sample_rate().0);
    let config: cpal::StreamConfig = supported_config
        .with_sample_rate(cpal::SampleRate(rate))
        .into();
    Ok((device, config))
}

/// Opens the default input and starts streaming framed mono buffers to `sink`.
fn build_stream(mut sink: BufferSink, frame_size: usize) -> Result<cpal::Stream> {
    let (device, config) = open_default_input()?;
    let sample_rate = config.sample_rate.0 as f64;
    let channels = config.channels.max(1) as usize;

    info!(
        device = %device.name().unwrap_or_else(|_| "unknown".into()),
        sample_rate,
        channels,
        "opening audio input"
    );

    let mut pending = Vec::with_capacity(frame_size * 2);
    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if channels == 1 {
                pending.extend_from_slice(data);
            } else {
                pending.extend(
                    data.chunks(channels)
                        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
                );
            }

            while pending.len() >= frame_size {
                sink(&pending[..frame_size], sample_rate);
                pending.drain(..frame_size);
            }
        },
        |err| error!("audio input stream error: {}", err),
        None,
    )?;

    stream.play()?;
    Ok(stream)
}

/// Finds the best supported configuration for the target sample rate.
///
/// Mono 32-bit float is preferred; otherwise any 32-bit float layout is
/// accepted and downmixed. Among candidates the one whose rate range comes
/// closest to `target_rate` wins.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    let distance = |c: &SupportedStreamConfigRange| {
        let (min, max) = (c.min_sample_rate().0, c.max_sample_rate().0);
        if (min..=max).contains(&target_rate) {
            0
        } else {
            (min as i64 - target_rate as i64)
                .abs()
                .min((max as i64 - target_rate as i64).abs())
        }
    };

    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32 && c.channels() > 0)
        .min_by_key(|c| (c.channels() != 1, distance(c)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::{SampleFormat, SampleRate, SupportedBufferSize};

    fn range(channels: u16, min: u32, max: u32, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn prefers_mono_float_input() {
        let configs = vec![
            range(2, 44100, 44100, SampleFormat::F32),
            range(1, 48000, 48000, SampleFormat::F32),
            range(1, 44100, 44100, SampleFormat::I16),
        ];
        let chosen = find_supported_config(configs, 44100).unwrap();
        assert_eq!(chosen.channels(), 1);
        assert_eq!(chosen.sample_format(), SampleFormat::F32);
    }

    #[test]
    fn falls_back_to_multichannel_float() {
        let configs = vec![
            range(2, 8000, 96000, SampleFormat::F32),
            range(1, 44100, 44100, SampleFormat::I16),
        ];
        let chosen = find_supported_config(configs, 44100).unwrap();
        assert_eq!(chosen.channels(), 2);
    }

    #[test]
    fn no_float_format_means_no_config() {
        let configs = vec![range(1, 44100, 44100, SampleFormat::I16)];
        assert!(find_supported_config(configs, 44100).is_none());
    }
}
