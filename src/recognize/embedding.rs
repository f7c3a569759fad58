use anyhow::{anyhow, Result};

use crate::frame::Frame;
use crate::recognize::recognizer::Recognizer;
use crate::recognize::result::IdentificationResult;
use crate::storage::{Encoding, EnrolledEncodings};

/// Similarity a best match must reach to count as identified.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.60;

/// Extracts a face feature vector from a frame.
///
/// Implementations wrap a face model. They return an error when the frame holds
/// no usable face (or more than one).
pub trait FaceEmbedder: Send + Sync {
    fn name(&self) -> &'static str;

    fn embed(&self, frame: &Frame) -> Result<Encoding>;
}

/// Recognizer that matches a frame embedding against enrolled encodings by
/// cosine similarity. The best scoring entity wins.
pub struct EmbeddingRecognizer<E> {
    embedder: E,
    min_confidence: f32,
}

impl<E: FaceEmbedder> EmbeddingRecognizer<E> {
    pub fn new(embedder: E) -> Self {
        Self {
            embedder,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence.clamp(0.0, 1.0);
        self
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }
}

impl<E: FaceEmbedder> Recognizer for EmbeddingRecognizer<E> {
    fn name(&self) -> &'static str {
        self.embedder.name()
    }

    fn identify(
        &self,
        frame: &Frame,
        enrolled: &EnrolledEncodings,
    ) -> Result<IdentificationResult> {
        if enrolled.is_empty() {
            return Ok(IdentificationResult::unmatched(0.0, "No enrolled faces"));
        }

        let probe = match self.embedder.embed(frame) {
            Ok(probe) => probe,
            Err(err) => return Ok(IdentificationResult::unmatched(0.0, format!("{err:#}"))),
        };

        let mut best: Option<(&str, f32)> = None;
        for (entity_id, encodings) in enrolled.iter() {
            for stored in encodings {
                let Some(similarity) = cosine_similarity(&probe, stored) else {
                    log::debug!(
                        "skipping encoding for {} with dimension {} (probe has {})",
                        entity_id,
                        stored.len(),
                        probe.len()
                    );
                    continue;
                };
                if best.map_or(true, |(_, score)| similarity > score) {
                    best = Some((entity_id, similarity));
                }
            }
        }

        let Some((entity_id, score)) = best else {
            return Ok(IdentificationResult::unmatched(0.0, "No comparable encodings"));
        };
        let confidence = round4(score.max(0.0));
        if confidence >= self.min_confidence {
            Ok(IdentificationResult::matched(entity_id, confidence))
        } else {
            Ok(IdentificationResult::unmatched(
                confidence,
                "Face did not match any enrolled employee",
            ))
        }
    }
}

/// Cosine similarity of two vectors.
///
/// Returns `None` when the dimensions differ and `Some(0.0)` when either vector
/// has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        dot += x as f64 * y as f64;
        norm_a += x as f64 * x as f64;
        norm_b += y as f64 * y as f64;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }
    Some((dot / (norm_a.sqrt() * norm_b.sqrt())) as f32)
}

fn round4(value: f32) -> f32 {
    (value * 10_000.0).round() / 10_000.0
}

/// Embedder used until a face model is wired in. Reports every frame as faceless.
#[derive(Debug, Default)]
pub struct StubEmbedder;

impl FaceEmbedder for StubEmbedder {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn embed(&self, _frame: &Frame) -> Result<Encoding> {
        Err(anyhow!("no face detected (stub embedder)"))
    }
}
