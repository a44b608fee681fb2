//! # Pitch Stream Controller
//!
//! Connects a [`SampleSource`] to the autocorrelation detector and
//! publishes the latest [`PitchEstimate`] to readers on other threads.
//!
//! ## Threads
//! - **Source thread**: calls the sink for every buffer. With
//!   [`Dispatch::Inline`] the buffer is analyzed right there; with
//!   [`Dispatch::Worker`] it is copied into a bounded channel instead.
//! - **Analysis thread** (worker dispatch only): analyzes copied buffers.
//! - **Readers**: poll [`EstimateHandle::latest`] or receive
//!   [`EstimateUpdate`]s from [`EstimateHandle::subscribe`].
//!
//! Publication swaps an `Arc` in an `ArcSwapOption`, so readers never block
//! and the writer never waits for them. A short lock orders publication
//! against [`PitchStreamController::stop`] so a stopped session cannot
//! publish again; it is never held while a buffer is analyzed.

use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

use crate::PitchEstimate;
use crate::config::{ControllerConfig, Dispatch, MissPolicy};
use crate::error::{Error, Result};
use crate::pitch::AutocorrelationDetector;
use crate::source::{BufferSink, SampleSource};

/// Session id meaning "no session is running".
const IDLE_SESSION: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    Idle,
    Detecting,
}

/// Counters accumulated over the controller's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStats {
    /// Buffers that went through the detector.
    pub buffers_analyzed: u64,
    /// Buffers that produced a pitch.
    pub detections: u64,
    /// Buffers the detector rejected (silence, noise, too short).
    pub rejections: u64,
    /// Buffers discarded because the worker queue was full.
    pub dropped_buffers: u64,
}

/// A change to the published estimate, delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimateUpdate {
    /// Monotonically increasing across all updates of one controller.
    pub sequence: u64,
    /// The new estimate, or `None` when it was cleared.
    pub estimate: Option<PitchEstimate>,
}

/// State shared between the controller, its sinks and its handles.
struct Shared {
    latest: ArcSwapOption<PitchEstimate>,
    active_session: AtomicU64,
    publish_gate: Mutex<()>,
    sequence: AtomicU64,
    subscribers: ArcSwap<Vec<Sender<EstimateUpdate>>>,
    buffers_analyzed: AtomicU64,
    detections: AtomicU64,
    rejections: AtomicU64,
    dropped_buffers: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            latest: ArcSwapOption::empty(),
            active_session: AtomicU64::new(IDLE_SESSION),
            publish_gate: Mutex::new(()),
            sequence: AtomicU64::new(0),
            subscribers: ArcSwap::from_pointee(Vec::new()),
            buffers_analyzed: AtomicU64::new(0),
            detections: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            dropped_buffers: AtomicU64::new(0),
        }
    }

    fn is_active(&self, session: u64) -> bool {
        self.active_session.load(Ordering::Acquire) == session
    }

    fn activate(&self, session: u64) {
        let _gate = self.publish_gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.active_session.store(session, Ordering::Release);
    }

    /// Ends the running session and clears the estimate. Any buffer still
    /// being analyzed for that session will find it inactive and discard
    /// its result.
    fn deactivate(&self) {
        let _gate = self.publish_gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.active_session.store(IDLE_SESSION, Ordering::Release);
        if self.latest.swap(None).is_some() {
            self.notify(None);
        }
    }

    /// Replaces the estimate if `session` is still the running one.
    fn publish(&self, session: u64, estimate: Option<PitchEstimate>) {
        let _gate = self.publish_gate.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_active(session) {
            trace!(session, "discarding result from a stopped session");
            return;
        }
        let had_estimate = self.latest.load().is_some();
        match estimate {
            Some(estimate) => {
                self.latest.store(Some(Arc::new(estimate.clone())));
                self.notify(Some(estimate));
            }
            None if had_estimate => {
                self.latest.store(None);
                self.notify(None);
            }
            None => {}
        }
    }

    /// Pushes an update to every subscriber without blocking. Subscribers
    /// whose queue is full miss the update; disconnected ones are removed.
    fn notify(&self, estimate: Option<PitchEstimate>) {
        let subscribers = self.subscribers.load();
        if subscribers.is_empty() {
            return;
        }
        let update = EstimateUpdate {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            estimate,
        };

        let mut disconnected = Vec::new();
        for subscriber in subscribers.iter() {
            match subscriber.try_send(update.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => trace!("subscriber queue full; update skipped"),
                Err(TrySendError::Disconnected(_)) => disconnected.push(subscriber.clone()),
            }
        }

        if !disconnected.is_empty() {
            debug!(count = disconnected.len(), "removing disconnected subscribers");
            self.subscribers.rcu(|current| {
                current
                    .iter()
                    .filter(|s| !disconnected.iter().any(|d| d.same_channel(s)))
                    .cloned()
                    .collect::<Vec<_>>()
            });
        }
    }

    fn subscribe(&self, capacity: usize) -> Receiver<EstimateUpdate> {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        self.subscribers.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(tx.clone());
            next
        });
        rx
    }

    fn stats(&self) -> ControllerStats {
        ControllerStats {
            buffers_analyzed: self.buffers_analyzed.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            dropped_buffers: self.dropped_buffers.load(Ordering::Relaxed),
        }
    }
}

/// Per-session analysis step: detect, map, publish.
struct Analyzer {
    detector: AutocorrelationDetector,
    miss_policy: MissPolicy,
    shared: Arc<Shared>,
    session: u64,
}

impl Analyzer {
    fn process(&self, samples: &[f32], sample_rate: f64) {
        if !self.shared.is_active(self.session) {
            return;
        }
        self.shared.buffers_analyzed.fetch_add(1, Ordering::Relaxed);

        match self.detector.analyze(samples, sample_rate) {
            Ok(frequency) => {
                self.shared.detections.fetch_add(1, Ordering::Relaxed);
                let estimate = PitchEstimate::from_frequency(frequency);
                trace!(
                    frequency,
                    note = %estimate.note_name,
                    cents = estimate.cents_deviation,
                    "pitch detected"
                );
                self.shared.publish(self.session, Some(estimate));
            }
            Err(rejection) => {
                self.shared.rejections.fetch_add(1, Ordering::Relaxed);
                trace!(%rejection, "no pitch in buffer");
                if self.miss_policy == MissPolicy::Clear {
                    self.shared.publish(self.session, None);
                }
            }
        }
    }
}

/// Analysis thread used with [`Dispatch::Worker`].
struct AnalysisWorker {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

impl AnalysisWorker {
    fn spawn(analyzer: Analyzer, buffers: Receiver<(Vec<f32>, f64)>) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("pitch-analysis".into())
            .spawn(move || {
                loop {
                    crossbeam_channel::select! {
                        recv(buffers) -> msg => match msg {
                            Ok((samples, sample_rate)) => analyzer.process(&samples, sample_rate),
                            Err(_) => break,
                        },
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                debug!("analysis thread finished");
            })?;
        Ok(Self {
            shutdown: shutdown_tx,
            handle,
        })
    }

    /// Lets the buffer currently being analyzed finish, then joins.
    fn shutdown(self) {
        let _ = self.shutdown.try_send(());
        if self.handle.join().is_err() {
            warn!("analysis thread panicked");
        }
    }
}

struct Running {
    source: Box<dyn SampleSource>,
    worker: Option<AnalysisWorker>,
}

/// Runs pitch detection against a sample source.
///
/// The controller is either `Idle` or `Detecting`. Readers on other threads
/// use an [`EstimateHandle`] obtained from [`handle`](Self::handle).
pub struct PitchStreamController {
    config: ControllerConfig,
    detector: AutocorrelationDetector,
    shared: Arc<Shared>,
    last_session: u64,
    running: Option<Running>,
}

impl PitchStreamController {
    /// Creates an idle controller. Fails if the configuration is invalid.
    pub fn new(config: ControllerConfig) -> Result<Self> {
        config.validate()?;
        let detector = AutocorrelationDetector::new(config.detector)?;
        Ok(Self {
            config,
            detector,
            shared: Arc::new(Shared::new()),
            last_session: IDLE_SESSION,
            running: None,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Starts detecting on buffers from `source`.
    ///
    /// Fails with [`Error::InvalidSourceFormat`] if the source reports a
    /// zero sample rate or channel count, and with [`Error::Source`] if the
    /// source cannot start; the controller stays idle in both cases.
    ///
    /// Calling `start` while already detecting does nothing: the running
    /// source keeps its attachment and `source` is dropped unused.
    pub fn start(&mut self, mut source: Box<dyn SampleSource>) -> Result<()> {
        if self.running.is_some() {
            debug!("start ignored: already detecting");
            return Ok(());
        }

        let format = source.format();
        if !format.is_valid() {
            warn!(
                sample_rate = format.sample_rate,
                channels = format.channels,
                "refusing to start on invalid source format"
            );
            return Err(Error::InvalidSourceFormat {
                sample_rate: format.sample_rate,
                channels: format.channels,
            });
        }

        self.last_session += 1;
        let session = self.last_session;
        let analyzer = Analyzer {
            detector: self.detector.clone(),
            miss_policy: self.config.miss_policy,
            shared: Arc::clone(&self.shared),
            session,
        };

        let (sink, worker) = match self.config.dispatch {
            Dispatch::Inline => {
                let sink: BufferSink =
                    Box::new(move |samples: &[f32], sample_rate: f64| {
                        analyzer.process(samples, sample_rate)
                    });
                (sink, None)
            }
            Dispatch::Worker { queue_depth } => {
                let (tx, rx) = crossbeam_channel::bounded(queue_depth);
                let worker = AnalysisWorker::spawn(analyzer, rx)?;
                let shared = Arc::clone(&self.shared);
                let sink: BufferSink = Box::new(move |samples: &[f32], sample_rate: f64| {
                    if !shared.is_active(session) {
                        return;
                    }
                    // The producer may reuse `samples` once we return.
                    if let Err(TrySendError::Full(_)) = tx.try_send((samples.to_vec(), sample_rate)) {
                        shared.dropped_buffers.fetch_add(1, Ordering::Relaxed);
                        trace!("analysis queue full; buffer dropped");
                    }
                });
                (sink, Some(worker))
            }
        };

        self.shared.activate(session);
        if let Err(err) = source.start(sink) {
            self.shared.deactivate();
            if let Some(worker) = worker {
                worker.shutdown();
            }
            warn!(error = %err, "sample source failed to start");
            return Err(Error::Source(err));
        }

        info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            dispatch = ?self.config.dispatch,
            "pitch detection started"
        );
        self.running = Some(Running { source, worker });
        Ok(())
    }

    /// Stops detecting and clears the published estimate. Safe to call in
    /// any state; a buffer already being analyzed finishes but its result
    /// is discarded.
    pub fn stop(&mut self) {
        self.shared.deactivate();
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.source.stop();
        if let Some(worker) = running.worker {
            worker.shutdown();
        }
        info!("pitch detection stopped");
    }

    pub fn state(&self) -> ControllerState {
        if self.running.is_some() {
            ControllerState::Detecting
        } else {
            ControllerState::Idle
        }
    }

    /// The most recent estimate, or `None` while waiting for a pitch.
    pub fn latest(&self) -> Option<Arc<PitchEstimate>> {
        self.shared.latest.load_full()
    }

    pub fn stats(&self) -> ControllerStats {
        self.shared.stats()
    }

    /// Receives every estimate change. Updates are dropped for a
    /// subscriber whose `capacity` unread updates are still queued.
    pub fn subscribe(&self, capacity: usize) -> Receiver<EstimateUpdate> {
        self.shared.subscribe(capacity)
    }

    /// A cloneable reader for use from other threads.
    pub fn handle(&self) -> EstimateHandle {
        EstimateHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for PitchStreamController {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Lock-free read access to a controller's published estimate.
#[derive(Clone)]
pub struct EstimateHandle {
    shared: Arc<Shared>,
}

impl EstimateHandle {
    /// The most recent estimate, or `None` while waiting for a pitch.
    pub fn latest(&self) -> Option<Arc<PitchEstimate>> {
        self.shared.latest.load_full()
    }

    pub fn state(&self) -> ControllerState {
        if self.shared.active_session.load(Ordering::Acquire) == IDLE_SESSION {
            ControllerState::Idle
        } else {
            ControllerState::Detecting
        }
    }

    pub fn stats(&self) -> ControllerStats {
        self.shared.stats()
    }

    pub fn subscribe(&self, capacity: usize) -> Receiver<EstimateUpdate> {
        self.shared.subscribe(capacity)
    }
}
