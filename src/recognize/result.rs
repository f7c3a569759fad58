use serde::Serialize;

/// Result of running recognition on one frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IdentificationResult {
    /// Did the best match clear the confidence threshold?
    pub identified: bool,
    /// Enrolled employee id of the best match, when identified.
    #[serde(rename = "employee_id")]
    pub entity_id: Option<String>,
    /// Similarity of the best match, in [0, 1].
    pub confidence: f32,
    pub message: String,
}

impl IdentificationResult {
    pub fn matched(entity_id: impl Into<String>, confidence: f32) -> Self {
        Self {
            identified: true,
            entity_id: Some(entity_id.into()),
            confidence: confidence.clamp(0.0, 1.0),
            message: "Face identified".to_string(),
        }
    }

    pub fn unmatched(confidence: f32, message: impl Into<String>) -> Self {
        Self {
            identified: false,
            entity_id: None,
            confidence: confidence.clamp(0.0, 1.0),
            message: message.into(),
        }
    }

    /// Entity to notify for, if this result is a positive identification.
    pub fn notifiable_entity(&self) -> Option<&str> {
        if !self.identified {
            return None;
        }
        self.entity_id.as_deref().filter(|id| !id.is_empty())
    }
}
