use anyhow::{anyhow, Result};

/// Whether a frame is analysed or passed over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleDecision {
    Sampled,
    Dropped,
}

/// Skip-cadence frame sampler with coarse progress tracking.
///
/// Frame `i` is sampled iff `i % skip == 0`. Progress is `round(i / total * 100)`,
/// refreshed every `progress_every` frames and held below 100 until `finish`.
#[derive(Debug, Clone)]
pub struct FrameSampler {
    skip: u64,
    progress_every: u64,
    total: u64,
    progress: u8,
}

impl FrameSampler {
    /// `total` of `None` or `Some(0)` is treated as 1.
    pub fn new(skip: u64, progress_every: u64, total: Option<u64>) -> Result<Self> {
        if skip == 0 {
            return Err(anyhow!("frame skip interval must be >= 1"));
        }
        if progress_every == 0 {
            return Err(anyhow!("progress interval must be >= 1"));
        }
        Ok(Self {
            skip,
            progress_every,
            total: total.filter(|t| *t > 0).unwrap_or(1),
            progress: 0,
        })
    }

    pub fn skip(&self) -> u64 {
        self.skip
    }

    pub fn is_sampled(&self, index: u64) -> bool {
        index % self.skip == 0
    }

    /// Record that frame `index` was read and decide what to do with it.
    pub fn observe(&mut self, index: u64) -> SampleDecision {
        if index % self.progress_every == 0 {
            let pct = (index as f64 / self.total as f64 * 100.0).round();
            let pct = pct.clamp(0.0, 99.0) as u8;
            self.progress = self.progress.max(pct);
        }
        if self.is_sampled(index) {
            SampleDecision::Sampled
        } else {
            SampleDecision::Dropped
        }
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// End of stream.
    pub fn finish(&mut self) -> u8 {
        self.progress = 100;
        self.progress
    }
}
