//! Face recognition contract.
//!
//! Workers hand every sampled frame to a `Recognizer` together with the enrolled
//! encodings loaded at worker startup. Feature extraction itself happens behind the
//! `FaceEmbedder` seam and is not implemented in this crate.

mod embedding;
mod recognizer;
mod result;

pub use embedding::{
    cosine_similarity, EmbeddingRecognizer, FaceEmbedder, StubEmbedder, DEFAULT_MIN_CONFIDENCE,
};
pub use recognizer::Recognizer;
pub use result::IdentificationResult;
