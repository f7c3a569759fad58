//! RTSP capture source.
//!
//! This module provides `RtspCapture` for reading frames from IP cameras.
//!
//! Supported URLs:
//! - `rtsp://...` decoded through GStreamer (feature: rtsp-gstreamer)
//! - `stub://<name>[?frames=N]` synthetic feed; with `frames` set, each session
//!   ends after N frames so reconnect handling can be exercised
//! - `stub://fail` a synthetic feed that always refuses to connect
//!
//! Frames are decoded to packed RGB24 and handed to the worker one at a time.

use anyhow::{anyhow, Context, Result};
use std::time::{Duration, Instant};
use url::Url;

use super::{CaptureHandle, CaptureSource};
use crate::frame::Frame;

/// Configuration shared by every session opened through an `RtspCapture`.
#[derive(Clone, Debug)]
pub struct RtspCaptureConfig {
    /// Target frame rate for synthetic feeds and the read timeout of real ones.
    /// Zero disables pacing of synthetic feeds.
    pub target_fps: u32,
    /// Frame width for synthetic feeds.
    pub width: u32,
    /// Frame height for synthetic feeds.
    pub height: u32,
}

impl Default for RtspCaptureConfig {
    fn default() -> Self {
        Self {
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// RTSP capture source.
///
/// Uses GStreamer for real RTSP decode, with a synthetic fallback for `stub://` URLs.
#[derive(Clone, Debug, Default)]
pub struct RtspCapture {
    config: RtspCaptureConfig,
}

impl RtspCapture {
    pub fn new(config: RtspCaptureConfig) -> Self {
        Self { config }
    }
}

impl CaptureSource for RtspCapture {
    fn open(&self, url: &str) -> Result<Box<dyn CaptureHandle>> {
        if url.starts_with("stub://") {
            return Ok(Box::new(SyntheticSession::open(url, &self.config)?));
        }

        #[cfg(feature = "rtsp-gstreamer")]
        {
            Ok(Box::new(GstreamerSession::open(url, &self.config)?))
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            anyhow::bail!("RTSP requires the rtsp-gstreamer feature (url: {})", url)
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticSession {
    name: String,
    width: u32,
    height: u32,
    frame_interval: Option<Duration>,
    frames_per_session: Option<u64>,
    frame_count: u64,
    scene_state: u8,
    last_frame_at: Option<Instant>,
}

impl SyntheticSession {
    fn open(raw_url: &str, config: &RtspCaptureConfig) -> Result<Self> {
        let url = Url::parse(raw_url).context("parse stub url")?;
        let name = url.host_str().unwrap_or("stub").to_string();
        if name == "fail" {
            return Err(anyhow!("synthetic feed {} refused connection", raw_url));
        }

        let mut frames_per_session = None;
        for (key, value) in url.query_pairs() {
            if key == "frames" {
                let frames: u64 = value
                    .parse()
                    .map_err(|_| anyhow!("stub frames must be an integer, got {:?}", value))?;
                frames_per_session = Some(frames);
            }
        }

        let frame_interval = if config.target_fps == 0 {
            None
        } else {
            Some(Duration::from_millis(1000 / config.target_fps as u64))
        };

        log::info!("RtspCapture: connected to {} (synthetic)", raw_url);
        Ok(Self {
            name,
            width: config.width,
            height: config.height,
            frame_interval,
            frames_per_session,
            frame_count: 0,
            scene_state: rand::random(),
            last_frame_at: None,
        })
    }

    /// Generate synthetic pixel data.
    ///
    /// The scene shifts every 50 frames to mimic someone walking into view.
    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.width as usize) * (self.height as usize) * 3;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }

    fn pace(&self) {
        let (Some(interval), Some(last)) = (self.frame_interval, self.last_frame_at) else {
            return;
        };
        let elapsed = last.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }
}

impl CaptureHandle for SyntheticSession {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(limit) = self.frames_per_session {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        self.pace();

        self.frame_count += 1;
        let pixels = self.generate_pixels();
        self.last_frame_at = Some(Instant::now());
        Ok(Some(Frame::new(
            pixels,
            self.width,
            self.height,
            self.frame_count,
        )))
    }

    fn release(&mut self) {
        log::debug!(
            "RtspCapture: released synthetic feed {} after {} frames",
            self.name,
            self.frame_count
        );
    }
}

// ----------------------------------------------------------------------------
// Production RTSP source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerSession {
    url: String,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    frame_timeout: gstreamer::ClockTime,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerSession {
    /// Build `rtspsrc ! decodebin ! videoconvert ! appsink`, start it, and wait for
    /// the pipeline to confirm the state change so a dead camera fails here rather
    /// than on the first read.
    fn open(url: &str, config: &RtspCaptureConfig) -> Result<Self> {
        use gstreamer::prelude::*;

        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            url
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        let (state_change, _, _) = pipeline.state(gstreamer::ClockTime::from_seconds(5));
        if let Err(err) = state_change {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(anyhow!("RTSP pipeline failed to start: {:?}", err));
        }

        let frame_timeout_ms = if config.target_fps == 0 {
            500
        } else {
            (1000 / config.target_fps as u64).saturating_mul(4).max(500)
        };

        let url = super::redact_url(url);
        log::info!("RtspCapture: connected to {}", url);
        Ok(Self {
            url,
            pipeline,
            appsink,
            frame_count: 0,
            frame_timeout: gstreamer::ClockTime::from_mseconds(frame_timeout_ms),
        })
    }

    /// Surface pipeline errors and EOS posted on the bus since the last read.
    fn poll_bus(&self) -> Result<bool> {
        use gstreamer::prelude::*;

        let Some(bus) = self.pipeline.bus() else {
            return Ok(false);
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(anyhow!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => return Ok(true),
                _ => {}
            }
        }
        Ok(false)
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl CaptureHandle for GstreamerSession {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.poll_bus()? || self.appsink.is_eos() {
            return Ok(None);
        }

        let Some(sample) = self.appsink.try_pull_sample(self.frame_timeout) else {
            if self.appsink.is_eos() {
                return Ok(None);
            }
            return Err(anyhow!("RTSP stream {} stalled", self.url));
        };

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        self.frame_count += 1;
        Ok(Some(Frame::new(pixels, width, height, self.frame_count)))
    }

    fn release(&mut self) {
        use gstreamer::prelude::*;

        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("RtspCapture: failed to stop pipeline for {}: {:?}", self.url, err);
        }
        log::debug!(
            "RtspCapture: released {} after {} frames",
            self.url,
            self.frame_count
        );
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
