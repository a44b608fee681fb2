//! # Sample Source Module
//!
//! The boundary between a sample producer (a microphone callback, a file
//! reader, a test signal) and the pitch stream controller.
//!
//! A source delivers mono buffers by calling its [`BufferSink`] on its own
//! thread. The slice passed to the sink is only valid for that call; the
//! producer is free to overwrite it as soon as the sink returns.

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::thread::{self, JoinHandle};

/// Callback a source invokes once per buffer with `(samples, sample_rate)`.
pub type BufferSink = Box<dyn FnMut(&[f32], f64) + Send + 'static>;

/// Stream format a source reports before it starts producing data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceFormat {
    /// Sample rate in Hz.
    pub sample_rate: f64,
    /// Channel count of the underlying device. Buffers handed to the sink
    /// are always mono; multi-channel sources downmix before delivery.
    pub channels: u16,
}

impl SourceFormat {
    pub fn mono(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }

    /// A usable format has a positive, finite sample rate and at least
    /// one channel.
    pub fn is_valid(&self) -> bool {
        self.sample_rate.is_finite() && self.sample_rate > 0.0 && self.channels > 0
    }
}

/// Something that produces sample buffers until stopped.
pub trait SampleSource: Send {
    /// The format buffers will be delivered in.
    fn format(&self) -> SourceFormat;

    /// Begins delivering buffers to `sink` from the source's own thread.
    fn start(&mut self, sink: BufferSink) -> Result<()>;

    /// Stops delivery. After this returns the sink is no longer called.
    /// Calling `stop` on a source that is not running does nothing.
    fn stop(&mut self);
}

/// A source that forwards owned frames received on a channel.
///
/// A dedicated thread pulls frames from the receiver and hands each one to
/// the sink, so any producer that can send `Vec<f32>` (a capture callback,
/// a decoder, a test) can drive the controller.
pub struct ChannelSource {
    format: SourceFormat,
    frames: Receiver<Vec<f32>>,
    pump: Option<Pump>,
}

struct Pump {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

impl ChannelSource {
    pub fn new(format: SourceFormat, frames: Receiver<Vec<f32>>) -> Self {
        Self {
            format,
            frames,
            pump: None,
        }
    }

    /// Creates a source together with the sender that feeds it.
    pub fn unbounded(format: SourceFormat) -> (Sender<Vec<f32>>, Self) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (tx, Self::new(format, rx))
    }

    pub fn is_running(&self) -> bool {
        self.pump.is_some()
    }
}

impl SampleSource for ChannelSource {
    fn format(&self) -> SourceFormat {
        self.format
    }

    fn start(&mut self, mut sink: BufferSink) -> Result<()> {
        if self.pump.is_some() {
            bail!("channel source is already running");
        }

        let frames = self.frames.clone();
        let sample_rate = self.format.sample_rate;
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("pitch-source".into())
            .spawn(move || {
                loop {
                    crossbeam_channel::select! {
                        recv(frames) -> msg => match msg {
                            Ok(frame) => sink(&frame, sample_rate),
                            Err(_) => {
                                tracing::debug!("frame sender disconnected");
                                break;
                            }
                        },
                        recv(shutdown_rx) -> _ => break,
                    }
                }
            })
            .context("failed to spawn source thread")?;

        self.pump = Some(Pump {
            shutdown: shutdown_tx,
            handle,
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(pump) = self.pump.take() {
            let _ = pump.shutdown.try_send(());
            if pump.handle.join().is_err() {
                tracing::warn!("source thread panicked");
            }
        }
    }
}

impl Drop for ChannelSource {
    fn drop(&mut self) {
        self.stop();
    }
}
