//! Per-camera worker.
//!
//! State machine: `Idle → Connecting → Running ⇄ Reconnecting → Stopped`.
//!
//! The worker:
//! 1. Loads enrolled encodings once; none found ends the worker before any capture.
//! 2. Opens the feed. Consecutive open failures are bounded by `max_reconnects`,
//!    with a fixed backoff between attempts. A successful open resets the count.
//! 3. Reads frames in capture order, samples, recognizes, dedups, notifies.
//! 4. On feed loss releases the session and reconnects.
//! 5. Checks its stop token at every iteration and during backoff.
//!
//! Nothing inside the worker propagates to callers. Every failure is absorbed,
//! logged, and mapped to a `FrameOutcome` or `WorkerExit`.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::Frame;
use crate::ingest::{redact_url, CaptureSession, CaptureSource};
use crate::recognize::Recognizer;
use crate::storage::{EncodingStore, EnrolledEncodings};
use crate::stream::callback::{CallbackDispatcher, CallbackPayload, DeliveryOutcome};
use crate::stream::config::StreamConfig;
use crate::stream::dedup::{Clock, Deduplicator, SystemClock};
use crate::stream::registry::StreamStatus;
use crate::stream::sampler::FrameSampler;
use crate::stream::stop::StopToken;

pub const DEFAULT_MAX_RECONNECTS: u32 = 5;
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Connecting,
    Running,
    Reconnecting,
    /// Terminal.
    Stopped,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Connecting => "connecting",
            WorkerState::Running => "running",
            WorkerState::Reconnecting => "reconnecting",
            WorkerState::Stopped => "stopped",
        }
    }
}

/// Supervision tunables.
#[derive(Clone, Debug)]
pub struct WorkerSettings {
    /// Consecutive open failures tolerated before the worker gives up.
    pub max_reconnects: u32,
    /// Wait between failed open attempts.
    pub reconnect_backoff: Duration,
    /// How long `stop_stream` waits for a worker to acknowledge.
    pub stop_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// External collaborators shared by every worker.
#[derive(Clone)]
pub struct Collaborators {
    pub capture: Arc<dyn CaptureSource>,
    pub recognizer: Arc<dyn Recognizer>,
    pub store: Arc<dyn EncodingStore>,
    pub dispatcher: Arc<CallbackDispatcher>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    pub fn new(
        capture: Arc<dyn CaptureSource>,
        recognizer: Arc<dyn Recognizer>,
        store: Arc<dyn EncodingStore>,
        dispatcher: Arc<CallbackDispatcher>,
    ) -> Self {
        Self {
            capture,
            recognizer,
            store,
            dispatcher,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Why a worker's control loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    StopRequested,
    NoEnrolledFaces,
    EncodingsUnavailable,
    ReconnectsExhausted { attempts: u32 },
}

/// What happened to one sampled frame. None of these end the worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    RecognitionFailed,
    Unidentified,
    Suppressed,
    Notified,
    DeliveryFailed,
}

enum SessionEnd {
    StopRequested,
    FeedLost,
}

// ----------------------------------------------------------------------------
// State published to the registry
// ----------------------------------------------------------------------------

/// Liveness and counters a worker publishes. The registry only reads these.
#[derive(Debug)]
struct WorkerShared {
    state: Mutex<WorkerState>,
    changed: Condvar,
    reconnect_attempts: AtomicU32,
    frames_read: AtomicU64,
    notifications_sent: AtomicU64,
}

impl WorkerShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(WorkerState::Idle),
            changed: Condvar::new(),
            reconnect_attempts: AtomicU32::new(0),
            frames_read: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
        }
    }

    fn set_state(&self, next: WorkerState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        // Stopped is terminal.
        if *state != WorkerState::Stopped {
            *state = next;
        }
        self.changed.notify_all();
    }

    fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_stopped(&self, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |state| *state != WorkerState::Stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *state == WorkerState::Stopped
    }
}

/// Marks the worker Stopped when its thread leaves the control loop, panics included.
struct StoppedOnExit(Arc<WorkerShared>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        self.0.set_state(WorkerState::Stopped);
    }
}

// ----------------------------------------------------------------------------
// Handle held by the registry
// ----------------------------------------------------------------------------

pub(crate) struct WorkerHandle {
    config: StreamConfig,
    shared: Arc<WorkerShared>,
    stop: StopToken,
    join: Mutex<Option<JoinHandle<WorkerExit>>>,
}

impl WorkerHandle {
    /// Launch a worker thread for `config`.
    pub(crate) fn spawn(
        config: StreamConfig,
        collaborators: Collaborators,
        settings: WorkerSettings,
    ) -> Result<Self> {
        let sampler = FrameSampler::new(config.frame_interval)?;
        let shared = Arc::new(WorkerShared::new());
        let stop = StopToken::new();

        let worker = StreamWorker {
            config: config.clone(),
            collaborators,
            settings,
            sampler,
            dedup: Deduplicator::new(),
            shared: shared.clone(),
            stop: stop.clone(),
        };
        let join = std::thread::Builder::new()
            .name(format!("stream-{}", config.camera_id))
            .spawn(move || worker.run())
            .with_context(|| format!("spawn worker thread for camera {}", config.camera_id))?;

        Ok(Self {
            config,
            shared,
            stop,
            join: Mutex::new(Some(join)),
        })
    }

    pub(crate) fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// True while the control loop is alive.
    pub(crate) fn is_running(&self) -> bool {
        self.shared.state() != WorkerState::Stopped
    }

    pub(crate) fn request_stop(&self) {
        self.stop.stop();
    }

    /// Wait up to `timeout` for the worker to reach Stopped.
    pub(crate) fn wait_stopped(&self, timeout: Duration) -> bool {
        self.shared.wait_stopped(timeout)
    }

    /// Join a worker that has already stopped.
    pub(crate) fn reap(&self) {
        if self.is_running() {
            return;
        }
        let join = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(join) = join {
            match join.join() {
                Ok(exit) => log::debug!("camera {}: worker exited: {:?}", self.config.camera_id, exit),
                Err(_) => log::error!("camera {}: worker thread panicked", self.config.camera_id),
            }
        }
    }

    pub(crate) fn status(&self) -> StreamStatus {
        let state = self.shared.state();
        StreamStatus {
            camera_id: self.config.camera_id.clone(),
            running: state != WorkerState::Stopped,
            state,
            reconnect_attempts: self.shared.reconnect_attempts.load(Ordering::Relaxed),
            frames_read: self.shared.frames_read.load(Ordering::Relaxed),
            notifications_sent: self.shared.notifications_sent.load(Ordering::Relaxed),
        }
    }
}

// ----------------------------------------------------------------------------
// Control loop
// ----------------------------------------------------------------------------

struct StreamWorker {
    config: StreamConfig,
    collaborators: Collaborators,
    settings: WorkerSettings,
    sampler: FrameSampler,
    dedup: Deduplicator,
    shared: Arc<WorkerShared>,
    stop: StopToken,
}

impl StreamWorker {
    fn run(mut self) -> WorkerExit {
        let _stopped = StoppedOnExit(self.shared.clone());
        log::info!(
            "camera {}: stream worker starting for {} (every {} frames)",
            self.config.camera_id,
            redact_url(&self.config.source_url),
            self.sampler.interval()
        );

        let exit = self.supervise();

        log::info!(
            "camera {}: stream worker stopped: {:?}",
            self.config.camera_id,
            exit
        );
        exit
    }

    fn supervise(&mut self) -> WorkerExit {
        self.shared.set_state(WorkerState::Connecting);

        let enrolled = match self.collaborators.store.load_all(&self.config.company_id) {
            Ok(enrolled) if !enrolled.is_empty() => enrolled,
            Ok(_) => {
                log::warn!(
                    "camera {}: no enrolled faces for company {}",
                    self.config.camera_id,
                    self.config.company_id
                );
                return WorkerExit::NoEnrolledFaces;
            }
            Err(err) => {
                log::error!(
                    "camera {}: failed to load encodings for company {}: {:#}",
                    self.config.camera_id,
                    self.config.company_id,
                    err
                );
                return WorkerExit::EncodingsUnavailable;
            }
        };
        log::info!(
            "camera {}: loaded encodings for {} employees",
            self.config.camera_id,
            enrolled.len()
        );

        let mut attempts = 0u32;
        loop {
            if self.stop.is_stopped() {
                return WorkerExit::StopRequested;
            }

            self.shared.set_state(WorkerState::Connecting);
            match self.collaborators.capture.open(&self.config.source_url) {
                Ok(handle) => {
                    attempts = 0;
                    self.shared.reconnect_attempts.store(0, Ordering::Relaxed);
                    self.shared.set_state(WorkerState::Running);
                    log::info!("camera {}: connected", self.config.camera_id);

                    match self.run_session(CaptureSession::new(handle), &enrolled) {
                        SessionEnd::StopRequested => return WorkerExit::StopRequested,
                        SessionEnd::FeedLost => self.shared.set_state(WorkerState::Reconnecting),
                    }
                }
                Err(err) => {
                    attempts += 1;
                    self.shared
                        .reconnect_attempts
                        .store(attempts, Ordering::Relaxed);
                    log::warn!(
                        "camera {}: failed to open {} (attempt {}/{}): {:#}",
                        self.config.camera_id,
                        redact_url(&self.config.source_url),
                        attempts,
                        self.settings.max_reconnects,
                        err
                    );
                    if attempts >= self.settings.max_reconnects {
                        log::error!(
                            "camera {}: giving up after {} consecutive connection failures",
                            self.config.camera_id,
                            attempts
                        );
                        return WorkerExit::ReconnectsExhausted { attempts };
                    }

                    self.shared.set_state(WorkerState::Reconnecting);
                    if self.stop.wait_timeout(self.settings.reconnect_backoff) {
                        return WorkerExit::StopRequested;
                    }
                }
            }
        }
    }

    /// Read frames until the feed drops or a stop is requested. The session is
    /// released before returning.
    fn run_session(
        &mut self,
        mut session: CaptureSession,
        enrolled: &EnrolledEncodings,
    ) -> SessionEnd {
        let mut frame_count = 0u64;
        loop {
            if self.stop.is_stopped() {
                session.release();
                return SessionEnd::StopRequested;
            }

            let frame = match session.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::warn!(
                        "camera {}: stream ended after {} frames, reconnecting",
                        self.config.camera_id,
                        frame_count
                    );
                    session.release();
                    return SessionEnd::FeedLost;
                }
                Err(err) => {
                    log::warn!(
                        "camera {}: failed to read frame, reconnecting: {:#}",
                        self.config.camera_id,
                        err
                    );
                    session.release();
                    return SessionEnd::FeedLost;
                }
            };

            frame_count += 1;
            self.shared.frames_read.fetch_add(1, Ordering::Relaxed);
            if !self.sampler.should_process(frame_count) {
                continue;
            }

            let outcome = self.process_frame(&frame, enrolled);
            log::trace!(
                "camera {}: frame {} -> {:?}",
                self.config.camera_id,
                frame_count,
                outcome
            );
        }
    }

    fn process_frame(&mut self, frame: &Frame, enrolled: &EnrolledEncodings) -> FrameOutcome {
        let result = match self.collaborators.recognizer.identify(frame, enrolled) {
            Ok(result) => result,
            Err(err) => {
                log::warn!(
                    "camera {}: recognition failed on frame {}, skipping: {:#}",
                    self.config.camera_id,
                    frame.sequence,
                    err
                );
                return FrameOutcome::RecognitionFailed;
            }
        };

        let Some(entity_id) = result.notifiable_entity() else {
            return FrameOutcome::Unidentified;
        };
        if !self
            .dedup
            .should_notify(entity_id, self.collaborators.clock.now())
        {
            log::debug!(
                "camera {}: {} already notified within the dedup window",
                self.config.camera_id,
                entity_id
            );
            return FrameOutcome::Suppressed;
        }

        let payload = CallbackPayload::check_in(&self.config, entity_id, result.confidence);
        match self
            .collaborators
            .dispatcher
            .notify(&payload, &self.config.callback_url)
        {
            DeliveryOutcome::Delivered => {
                self.shared
                    .notifications_sent
                    .fetch_add(1, Ordering::Relaxed);
                FrameOutcome::Notified
            }
            DeliveryOutcome::Failed => FrameOutcome::DeliveryFailed,
        }
    }
}
