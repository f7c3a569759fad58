//! Capture sources.
//!
//! This module provides the capture contract consumed by stream workers:
//! - `CaptureSource::open` connects to a feed URL and yields a session handle
//! - `CaptureHandle::read_frame` returns the next frame, `None` at end of stream
//! - `CaptureHandle::release` frees the underlying connection
//!
//! Workers hold handles through `CaptureSession`, which releases on drop so every
//! exit path (stop, feed loss, panic) frees the connection exactly once.
//!
//! Available sources:
//! - RTSP streams via GStreamer (feature: rtsp-gstreamer)
//! - Synthetic `stub://` feeds (testing, demos)

use anyhow::{anyhow, Result};
use url::Url;

use crate::frame::Frame;

pub mod rtsp;

pub use rtsp::{RtspCapture, RtspCaptureConfig};

/// Opens capture sessions for feed URLs.
///
/// Implementations are shared by every worker, so `open` takes `&self` and must be
/// safe to call from many threads at once.
pub trait CaptureSource: Send + Sync {
    /// Connect to `url`. Failure is reported as an error and counts as one
    /// reconnect attempt for the calling worker.
    fn open(&self, url: &str) -> Result<Box<dyn CaptureHandle>>;
}

/// An open connection to one feed.
pub trait CaptureHandle: Send {
    /// Read the next frame.
    ///
    /// `Ok(None)` means the feed ended cleanly; errors mean the feed dropped.
    /// Both end the session.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the connection. Called once per successful `open`.
    fn release(&mut self);
}

/// Owns an open handle and releases it when dropped.
pub struct CaptureSession {
    handle: Option<Box<dyn CaptureHandle>>,
}

impl CaptureSession {
    pub fn new(handle: Box<dyn CaptureHandle>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        match self.handle.as_mut() {
            Some(handle) => handle.read_frame(),
            None => Err(anyhow!("capture session already released")),
        }
    }

    /// Release the handle now. Later calls (and the drop) are no-ops.
    pub fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.release();
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Hide credentials embedded in a feed URL before logging it.
pub(crate) fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("***"));
            url.to_string()
        }
        _ => raw.to_string(),
    }
}

/// Result of a one-shot connectivity check.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ProbeReport {
    pub success: bool,
    pub message: String,
}

/// Open `url`, read a single frame, and release.
///
/// Used to validate a camera URL before starting a stream for it.
pub fn probe_source(source: &dyn CaptureSource, url: &str) -> ProbeReport {
    if url.trim().is_empty() {
        return ProbeReport {
            success: false,
            message: "stream URL is required".to_string(),
        };
    }

    let mut session = match source.open(url) {
        Ok(handle) => CaptureSession::new(handle),
        Err(err) => {
            log::warn!("probe of {} failed to connect: {:#}", redact_url(url), err);
            return ProbeReport {
                success: false,
                message: "Failed to connect to stream. Check the URL and ensure the camera is accessible."
                    .to_string(),
            };
        }
    };

    let report = match session.read_frame() {
        Ok(Some(_)) => ProbeReport {
            success: true,
            message: "Successfully connected to stream and captured a frame.".to_string(),
        },
        Ok(None) => ProbeReport {
            success: false,
            message: "Connected to stream but it ended before a frame was read.".to_string(),
        },
        Err(err) => {
            log::warn!("probe of {} failed to read a frame: {:#}", redact_url(url), err);
            ProbeReport {
                success: false,
                message: "Connected to stream but failed to read a frame. The stream may be unavailable."
                    .to_string(),
            }
        }
    };
    session.release();
    report
}
