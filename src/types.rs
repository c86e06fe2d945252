/// An accepted detection waiting to be applied to the delayed audio.
/// Both ends are absolute host-clock sample indices, `start < end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingMatch {
    pub start_sample: u64,
    pub end_sample: u64,
}

impl PendingMatch {
    pub fn new(start_sample: u64, end_sample: u64) -> Self {
        Self {
            start_sample,
            end_sample,
        }
    }

    pub fn len(&self) -> u64 {
        self.end_sample.saturating_sub(self.start_sample)
    }

    pub fn is_empty(&self) -> bool {
        self.start_sample >= self.end_sample
    }

    /// Half-open overlap test.
    pub fn overlaps(&self, other: &PendingMatch) -> bool {
        self.start_sample < other.end_sample && other.start_sample < self.end_sample
    }
}
