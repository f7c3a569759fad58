//! Check-in webhook delivery.
//!
//! Delivery is at-most-once: one POST per event with a bounded timeout, no retry,
//! no queue. A failed delivery is logged and the event is lost.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::stream::config::StreamConfig;

/// Header carrying the shared secret expected by the attendance backend.
pub const API_SECRET_HEADER: &str = "x-api-secret";

pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Webhook body for one identification. Built fresh per dispatched event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CallbackPayload {
    #[serde(rename = "employee_id")]
    pub entity_id: String,
    pub camera_id: String,
    pub company_id: String,
    pub location_id: String,
    pub confidence: f32,
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub source: &'static str,
}

impl CallbackPayload {
    pub fn check_in(config: &StreamConfig, entity_id: &str, confidence: f32) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            camera_id: config.camera_id.clone(),
            company_id: config.company_id.clone(),
            location_id: config.location_id.clone(),
            confidence,
            event_type: "check_in",
            source: "rtsp",
        }
    }
}

/// Outbound HTTP seam.
pub trait CallbackSink: Send + Sync {
    /// POST `body` as JSON to `url`. Non-2xx responses are errors.
    fn post_json(&self, url: &str, body: &[u8], headers: &[(&str, &str)]) -> Result<()>;
}

/// Blocking HTTP sink backed by a shared `ureq` agent.
pub struct UreqSink {
    agent: ureq::Agent,
}

impl UreqSink {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent }
    }
}

impl Default for UreqSink {
    fn default() -> Self {
        Self::new(DEFAULT_CALLBACK_TIMEOUT)
    }
}

impl CallbackSink for UreqSink {
    fn post_json(&self, url: &str, body: &[u8], headers: &[(&str, &str)]) -> Result<()> {
        let mut request = self.agent.post(url).set("Content-Type", "application/json");
        for (name, value) in headers {
            request = request.set(name, value);
        }
        match request.send_bytes(body) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => {
                Err(anyhow!("webhook {} responded with HTTP {}", url, code))
            }
            Err(err) => Err(anyhow!("webhook request to {} failed: {}", url, err)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Logged and discarded.
    Failed,
}

/// Formats and sends check-in notifications.
pub struct CallbackDispatcher {
    sink: Arc<dyn CallbackSink>,
    secret: Option<String>,
}

impl CallbackDispatcher {
    /// `secret`, when set and non-empty, is sent in the `x-api-secret` header.
    pub fn new(sink: Arc<dyn CallbackSink>, secret: Option<String>) -> Self {
        let secret = secret.filter(|secret| !secret.trim().is_empty());
        Self { sink, secret }
    }

    pub fn notify(&self, payload: &CallbackPayload, callback_url: &str) -> DeliveryOutcome {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(err) => {
                log::error!(
                    "camera {}: failed to encode callback for {}: {}",
                    payload.camera_id,
                    payload.entity_id,
                    err
                );
                return DeliveryOutcome::Failed;
            }
        };

        let mut headers = Vec::with_capacity(1);
        if let Some(secret) = &self.secret {
            headers.push((API_SECRET_HEADER, secret.as_str()));
        }

        match self.sink.post_json(callback_url, &body, &headers) {
            Ok(()) => {
                log::info!(
                    "camera {}: check-in for {} delivered (confidence {:.2})",
                    payload.camera_id,
                    payload.entity_id,
                    payload.confidence
                );
                DeliveryOutcome::Delivered
            }
            Err(err) => {
                log::error!(
                    "camera {}: check-in for {} dropped: {:#}",
                    payload.camera_id,
                    payload.entity_id,
                    err
                );
                DeliveryOutcome::Failed
            }
        }
    }
}
