//! Fakes shared by the integration tests.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use face_stream::{
    CallbackDispatcher, CallbackSink, CaptureHandle, CaptureSource, Collaborators,
    EnrolledEncodings, Frame, IdentificationResult, InMemoryEncodingStore, ManualClock,
    Recognizer, StreamConfig, StreamRegistry, WorkerSettings,
};

/// Capture source with scripted sessions.
///
/// URLs containing `fail` never connect. Every other session yields
/// `frames_per_session` frames (unbounded when `None`) and then reports end of
/// stream. Opens beyond the permitted count block until `permit_opens` raises it.
/// With `blocking_reads`, every read parks until `unblock_reads` is called.
pub struct ScriptedCapture {
    frames_per_session: Option<u64>,
    gate: Mutex<Gate>,
    gate_changed: Condvar,
    read_gate: Arc<ReadGate>,
    opens_by_url: Mutex<HashMap<String, usize>>,
    releases: Arc<AtomicUsize>,
}

#[derive(Default)]
struct ReadGate {
    blocked: Mutex<bool>,
    changed: Condvar,
    parked: AtomicUsize,
}

impl ReadGate {
    fn pass(&self) {
        let mut blocked = self.blocked.lock().unwrap();
        if *blocked {
            self.parked.fetch_add(1, Ordering::SeqCst);
            while *blocked {
                blocked = self.changed.wait(blocked).unwrap();
            }
        }
    }
}

struct Gate {
    permitted: Option<usize>,
    started: usize,
}

impl ScriptedCapture {
    pub fn unbounded() -> Self {
        Self::with_frames(None)
    }

    pub fn with_frames(frames_per_session: Option<u64>) -> Self {
        Self {
            frames_per_session,
            gate: Mutex::new(Gate {
                permitted: None,
                started: 0,
            }),
            gate_changed: Condvar::new(),
            read_gate: Arc::new(ReadGate::default()),
            opens_by_url: Mutex::new(HashMap::new()),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Only let the first `n` opens through until more are permitted.
    pub fn gated(self, n: usize) -> Self {
        self.gate.lock().unwrap().permitted = Some(n);
        self
    }

    pub fn blocking_reads(self) -> Self {
        *self.read_gate.blocked.lock().unwrap() = true;
        self
    }

    pub fn unblock_reads(&self) {
        *self.read_gate.blocked.lock().unwrap() = false;
        self.read_gate.changed.notify_all();
    }

    /// Reads that have parked on the read gate so far.
    pub fn parked_reads(&self) -> usize {
        self.read_gate.parked.load(Ordering::SeqCst)
    }

    pub fn permit_opens(&self, n: usize) {
        let mut gate = self.gate.lock().unwrap();
        gate.permitted = gate.permitted.map(|permitted| permitted + n);
        self.gate_changed.notify_all();
    }

    pub fn open_gate(&self) {
        self.gate.lock().unwrap().permitted = None;
        self.gate_changed.notify_all();
    }

    pub fn opens(&self) -> usize {
        self.opens_by_url.lock().unwrap().values().sum()
    }

    pub fn opens_of(&self, url: &str) -> usize {
        self.opens_by_url
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    /// Sessions released so far.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl CaptureSource for ScriptedCapture {
    fn open(&self, url: &str) -> Result<Box<dyn CaptureHandle>> {
        {
            let mut gate = self.gate.lock().unwrap();
            while gate.permitted.map_or(false, |permitted| gate.started >= permitted) {
                gate = self.gate_changed.wait(gate).unwrap();
            }
            gate.started += 1;
        }
        *self
            .opens_by_url
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_insert(0) += 1;

        if url.contains("fail") {
            return Err(anyhow!("connection refused: {}", url));
        }
        Ok(Box::new(ScriptedHandle {
            remaining: self.frames_per_session,
            sequence: 0,
            read_gate: self.read_gate.clone(),
            releases: self.releases.clone(),
            released: false,
        }))
    }
}

struct ScriptedHandle {
    remaining: Option<u64>,
    sequence: u64,
    read_gate: Arc<ReadGate>,
    releases: Arc<AtomicUsize>,
    released: bool,
}

impl CaptureHandle for ScriptedHandle {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.read_gate.pass();
        match self.remaining.as_mut() {
            Some(0) => return Ok(None),
            Some(remaining) => *remaining -= 1,
            None => std::thread::sleep(Duration::from_millis(1)),
        }
        self.sequence += 1;
        Ok(Some(Frame::new(vec![0; 12], 2, 2, self.sequence)))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Recognizer that identifies the same person in every frame it can evaluate.
///
/// With `failing_every(k)`, calls 1, 1+k, 1+2k, ... return an error instead.
pub struct CountingRecognizer {
    entity_id: String,
    fail_every: Option<usize>,
    calls: AtomicUsize,
    failures: AtomicUsize,
}

impl CountingRecognizer {
    pub fn new(entity_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            fail_every: None,
            calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn failing_every(entity_id: &str, k: usize) -> Self {
        Self {
            fail_every: Some(k.max(1)),
            ..Self::new(entity_id)
        }
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Recognizer for CountingRecognizer {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn identify(&self, _frame: &Frame, _enrolled: &EnrolledEncodings) -> Result<IdentificationResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_every.map_or(false, |k| call % k == 0) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(anyhow!("model inference failed on frame"));
        }
        Ok(IdentificationResult::matched(self.entity_id.clone(), 0.9))
    }
}

/// Webhook sink that records request bodies.
#[derive(Default)]
pub struct RecordingSink {
    bodies: Mutex<Vec<serde_json::Value>>,
    pub fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn bodies(&self) -> Vec<serde_json::Value> {
        self.bodies.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.bodies.lock().unwrap().len()
    }
}

impl CallbackSink for RecordingSink {
    fn post_json(&self, _url: &str, body: &[u8], _headers: &[(&str, &str)]) -> Result<()> {
        self.bodies.lock().unwrap().push(serde_json::from_slice(body)?);
        if self.fail {
            return Err(anyhow!("webhook unreachable"));
        }
        Ok(())
    }
}

pub struct Harness {
    pub capture: Arc<ScriptedCapture>,
    pub recognizer: Arc<CountingRecognizer>,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<ManualClock>,
    pub registry: StreamRegistry,
}

impl Harness {
    pub fn new(capture: ScriptedCapture, sink: RecordingSink, settings: WorkerSettings) -> Self {
        Self::with_store(capture, sink, enrolled_store(), settings)
    }

    pub fn with_store(
        capture: ScriptedCapture,
        sink: RecordingSink,
        store: InMemoryEncodingStore,
        settings: WorkerSettings,
    ) -> Self {
        Self::build(capture, CountingRecognizer::new("emp1"), sink, store, settings)
    }

    pub fn with_recognizer(
        capture: ScriptedCapture,
        recognizer: CountingRecognizer,
        sink: RecordingSink,
        settings: WorkerSettings,
    ) -> Self {
        Self::build(capture, recognizer, sink, enrolled_store(), settings)
    }

    fn build(
        capture: ScriptedCapture,
        recognizer: CountingRecognizer,
        sink: RecordingSink,
        store: InMemoryEncodingStore,
        settings: WorkerSettings,
    ) -> Self {
        let capture = Arc::new(capture);
        let recognizer = Arc::new(recognizer);
        let sink = Arc::new(sink);
        let clock = Arc::new(ManualClock::new());
        let collaborators = Collaborators::new(
            capture.clone(),
            recognizer.clone(),
            Arc::new(store),
            Arc::new(CallbackDispatcher::new(sink.clone(), Some("s3cret".to_string()))),
        )
        .with_clock(clock.clone());
        Self {
            capture,
            recognizer,
            sink,
            clock,
            registry: StreamRegistry::new(collaborators, settings),
        }
    }
}

fn enrolled_store() -> InMemoryEncodingStore {
    let store = InMemoryEncodingStore::new();
    store.insert("acme", "emp1", vec![vec![1.0, 0.0, 0.0]]);
    store
}

pub fn fast_settings() -> WorkerSettings {
    WorkerSettings {
        max_reconnects: 5,
        reconnect_backoff: Duration::from_millis(10),
        stop_timeout: Duration::from_secs(5),
    }
}

pub fn stream_config(camera_id: &str, url: &str, frame_interval: u32) -> StreamConfig {
    StreamConfig::new(camera_id, url, "acme", "hq", "http://127.0.0.1:9/hook")
        .with_frame_interval(frame_interval)
}

/// Poll `condition` for up to five seconds.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
