//! Decoded frames handed from a capture session to the recognizer.
//!
//! Frames are ephemeral: a worker holds at most one at a time and drops it as soon
//! as recognition returns. They are never written to disk or forwarded in a webhook.

use std::time::Instant;

/// A single decoded RGB frame.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Packed RGB24 pixel data, `width * height * 3` bytes.
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Position of this frame within its capture session, starting at 1.
    pub sequence: u64,
    /// Monotonic capture instant.
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Expected byte length for packed RGB24 at this frame's dimensions.
    pub fn expected_len(&self) -> usize {
        (self.width as usize) * (self.height as usize) * 3
    }

    /// True when the pixel buffer matches the declared dimensions.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.pixels.len() == self.expected_len()
    }
}
