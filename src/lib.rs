//! Face stream supervisor
//!
//! This crate keeps one continuous video feed per camera under face recognition
//! and notifies an attendance system when an enrolled person is seen.
//!
//! # Architecture
//!
//! Each camera gets its own worker thread, supervised by a registry:
//!
//! 1. **Registry**: at most one running worker per camera id; start/stop/status.
//! 2. **Worker**: connect, read, sample, recognize, dedup, notify, reconnect, stop.
//! 3. **Sampling**: only every Nth frame reaches the recognizer.
//! 4. **Dedup**: one notification per person per camera per 300 second window.
//! 5. **Callback**: best-effort webhook POST, never retried.
//!
//! # Module Structure
//!
//! - `stream`: registry, worker state machine, sampler, dedup, callback dispatch
//! - `ingest`: capture sources (RTSP via GStreamer, synthetic `stub://` feeds)
//! - `recognize`: recognizer contract and the embedding-matching recognizer
//! - `storage`: enrolled face encodings per company
//! - `api`: loopback HTTP control surface
//! - `config`: service configuration (file + environment)

use anyhow::{anyhow, Result};
use std::sync::OnceLock;

pub mod api;
pub mod config;
pub mod frame;
pub mod ingest;
pub mod recognize;
pub mod storage;
pub mod stream;

pub use frame::Frame;
pub use ingest::{probe_source, CaptureHandle, CaptureSource, ProbeReport, RtspCapture};
pub use recognize::{
    EmbeddingRecognizer, FaceEmbedder, IdentificationResult, Recognizer, StubEmbedder,
};
pub use storage::{
    Encoding, EncodingStore, EnrolledEncodings, InMemoryEncodingStore, JsonEncodingStore,
};
pub use stream::{
    CallbackDispatcher, CallbackPayload, CallbackSink, Clock, Collaborators, Deduplicator,
    DeliveryOutcome, FrameSampler, ManualClock, StopToken, StreamConfig, StreamRegistry,
    StreamStatus, SystemClock, UreqSink, WorkerExit, WorkerSettings, WorkerState,
};

/// Validate an identifier that is used as a map key or a storage path component.
///
/// Allowed: "cam1", "front-door", "company_42"
/// Disallowed: empty strings, whitespace, slashes, dots, or anything over 128 chars.
pub fn validate_identifier(kind: &str, value: &str) -> Result<()> {
    static IDENTIFIER_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = IDENTIFIER_RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("identifier pattern is valid")
    });

    if !re.is_match(value) {
        return Err(anyhow!(
            "{} must match ^[A-Za-z0-9_-]{{1,128}}$ (got {:?})",
            kind,
            value
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_accept_simple_keys() {
        assert!(validate_identifier("camera_id", "cam1").is_ok());
        assert!(validate_identifier("camera_id", "front-door_2").is_ok());
    }

    #[test]
    fn identifiers_reject_path_components() {
        assert!(validate_identifier("company_id", "").is_err());
        assert!(validate_identifier("company_id", "../etc").is_err());
        assert!(validate_identifier("company_id", "a/b").is_err());
        assert!(validate_identifier("company_id", "with space").is_err());
        assert!(validate_identifier("company_id", &"x".repeat(129)).is_err());
    }
}
