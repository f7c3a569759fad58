use anyhow::Result;

use crate::frame::Frame;
use crate::recognize::result::IdentificationResult;
use crate::storage::EnrolledEncodings;

/// Recognizer trait.
///
/// One instance is shared by every worker, so `identify` takes `&self`.
/// Implementations must treat the frame as read-only and ephemeral.
pub trait Recognizer: Send + Sync {
    /// Recognizer identifier for logs.
    fn name(&self) -> &'static str;

    /// Identify the person in `frame` against `enrolled`.
    ///
    /// An error means this frame could not be evaluated. Callers treat it as
    /// `identified = false` and move on to the next frame.
    fn identify(&self, frame: &Frame, enrolled: &EnrolledEncodings)
        -> Result<IdentificationResult>;
}
