use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::validate_identifier;

/// Process every 30th frame unless told otherwise.
pub const DEFAULT_FRAME_INTERVAL: u32 = 30;

/// Everything a worker needs to supervise one camera.
///
/// Immutable once a worker has been started from it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Unique key in the registry.
    pub camera_id: String,
    /// Feed URL handed to the capture source.
    #[serde(alias = "rtsp_url")]
    pub source_url: String,
    pub company_id: String,
    pub location_id: String,
    /// Webhook that receives check-in notifications.
    pub callback_url: String,
    /// Sampling stride: only every Nth frame is recognized.
    #[serde(default = "default_frame_interval")]
    pub frame_interval: u32,
}

fn default_frame_interval() -> u32 {
    DEFAULT_FRAME_INTERVAL
}

impl StreamConfig {
    pub fn new(
        camera_id: impl Into<String>,
        source_url: impl Into<String>,
        company_id: impl Into<String>,
        location_id: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            source_url: source_url.into(),
            company_id: company_id.into(),
            location_id: location_id.into(),
            callback_url: callback_url.into(),
            frame_interval: DEFAULT_FRAME_INTERVAL,
        }
    }

    pub fn with_frame_interval(mut self, frame_interval: u32) -> Self {
        self.frame_interval = frame_interval;
        self
    }

    /// Reject configs a worker could never run correctly.
    pub fn validate(&self) -> Result<()> {
        if self.camera_id.trim().is_empty() {
            return Err(anyhow!("camera_id must not be empty"));
        }
        // Names the worker thread, which cannot carry NUL bytes.
        if self.camera_id.chars().any(char::is_control) {
            return Err(anyhow!(
                "camera_id must not contain control characters (got {:?})",
                self.camera_id
            ));
        }
        validate_identifier("company_id", &self.company_id)?;
        if self.location_id.trim().is_empty() {
            return Err(anyhow!("location_id must not be empty"));
        }
        if self.source_url.trim().is_empty() {
            return Err(anyhow!("source_url must not be empty"));
        }
        if self.frame_interval == 0 {
            return Err(anyhow!("frame_interval must be at least 1"));
        }

        let callback = Url::parse(&self.callback_url)
            .map_err(|e| anyhow!("invalid callback_url {:?}: {}", self.callback_url, e))?;
        if !matches!(callback.scheme(), "http" | "https") {
            return Err(anyhow!(
                "callback_url must use http or https, got {}",
                callback.scheme()
            ));
        }
        Ok(())
    }
}
