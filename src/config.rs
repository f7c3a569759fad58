use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::recognize::DEFAULT_MIN_CONFIDENCE;
use crate::stream::{
    WorkerSettings, DEFAULT_CALLBACK_TIMEOUT, DEFAULT_FRAME_INTERVAL, DEFAULT_MAX_RECONNECTS,
    DEFAULT_RECONNECT_BACKOFF, DEFAULT_STOP_TIMEOUT,
};

const DEFAULT_API_ADDR: &str = "127.0.0.1:8800";
const DEFAULT_STORAGE_PATH: &str = "./storage";
const DEFAULT_CAPTURE_FPS: u32 = 10;

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    storage_path: Option<String>,
    internal_api_secret: Option<String>,
    min_confidence: Option<f32>,
    api: Option<ApiConfigFile>,
    capture: Option<CaptureConfigFile>,
    supervision: Option<SupervisionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SupervisionConfigFile {
    max_reconnects: Option<u32>,
    reconnect_backoff_secs: Option<u64>,
    stop_timeout_secs: Option<u64>,
    callback_timeout_secs: Option<u64>,
    default_frame_interval: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_addr: String,
    pub storage_path: PathBuf,
    /// Shared secret for the control API and outbound webhooks.
    pub internal_api_secret: Option<String>,
    pub min_confidence: f32,
    pub capture_fps: u32,
    pub supervision: SupervisionSettings,
}

#[derive(Debug, Clone)]
pub struct SupervisionSettings {
    pub max_reconnects: u32,
    pub reconnect_backoff: Duration,
    pub stop_timeout: Duration,
    pub callback_timeout: Duration,
    pub default_frame_interval: u32,
}

impl SupervisionSettings {
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            max_reconnects: self.max_reconnects,
            reconnect_backoff: self.reconnect_backoff,
            stop_timeout: self.stop_timeout,
        }
    }
}

impl ServiceConfig {
    /// Load from the file named by `FACE_STREAM_CONFIG` (if any), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FACE_STREAM_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (if any), then apply environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ServiceConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let storage_path = PathBuf::from(
            file.storage_path
                .unwrap_or_else(|| DEFAULT_STORAGE_PATH.to_string()),
        );
        let capture_fps = file
            .capture
            .and_then(|capture| capture.target_fps)
            .unwrap_or(DEFAULT_CAPTURE_FPS);

        let supervision_file = file.supervision.unwrap_or_default();
        let supervision = SupervisionSettings {
            max_reconnects: supervision_file
                .max_reconnects
                .unwrap_or(DEFAULT_MAX_RECONNECTS),
            reconnect_backoff: supervision_file
                .reconnect_backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RECONNECT_BACKOFF),
            stop_timeout: supervision_file
                .stop_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_STOP_TIMEOUT),
            callback_timeout: supervision_file
                .callback_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CALLBACK_TIMEOUT),
            default_frame_interval: supervision_file
                .default_frame_interval
                .unwrap_or(DEFAULT_FRAME_INTERVAL),
        };

        Self {
            api_addr,
            storage_path,
            internal_api_secret: file.internal_api_secret,
            min_confidence: file.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
            capture_fps,
            supervision,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("FACE_STREAM_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(path) = std::env::var("FACE_STREAM_STORAGE_PATH") {
            if !path.trim().is_empty() {
                self.storage_path = PathBuf::from(path);
            }
        }
        if let Ok(secret) = std::env::var("INTERNAL_API_SECRET") {
            if !secret.trim().is_empty() {
                self.internal_api_secret = Some(secret);
            }
        }
        if let Ok(value) = std::env::var("FACE_STREAM_MIN_CONFIDENCE") {
            self.min_confidence = value.trim().parse().map_err(|_| {
                anyhow!("FACE_STREAM_MIN_CONFIDENCE must be a number between 0 and 1")
            })?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(anyhow!("min_confidence must be between 0 and 1"));
        }
        if self.supervision.max_reconnects == 0 {
            return Err(anyhow!("supervision.max_reconnects must be at least 1"));
        }
        if self.supervision.default_frame_interval == 0 {
            return Err(anyhow!(
                "supervision.default_frame_interval must be at least 1"
            ));
        }
        if self.supervision.callback_timeout.is_zero() {
            return Err(anyhow!(
                "supervision.callback_timeout_secs must be greater than zero"
            ));
        }
        self.internal_api_secret = self
            .internal_api_secret
            .take()
            .filter(|secret| !secret.trim().is_empty());
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
