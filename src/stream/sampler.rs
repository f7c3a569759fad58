use anyhow::{anyhow, Result};
use std::num::NonZeroU32;

/// Frame decimation: a frame is processed iff `frame_count % interval == 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSampler {
    interval: NonZeroU32,
}

impl FrameSampler {
    pub fn new(interval: u32) -> Result<Self> {
        let interval =
            NonZeroU32::new(interval).ok_or_else(|| anyhow!("frame_interval must be at least 1"))?;
        Ok(Self { interval })
    }

    pub fn interval(&self) -> u32 {
        self.interval.get()
    }

    /// `frame_count` is the 1-based count of frames read in the current session.
    pub fn should_process(&self, frame_count: u64) -> bool {
        frame_count % u64::from(self.interval.get()) == 0
    }
}
