//! Recognition clock to host clock.
//!
//! Three clocks meet here: the host's running sample counter, the 16 kHz
//! count of samples the worker has handed to the recognizer, and the
//! recognizer's own per-segment seconds. [`TimeBase`] keeps the worker's
//! bookkeeping between the first two; [`TimeMapper`] turns a token time into
//! an absolute host sample using a snapshot of it.
//!
//! ```text
//! abs = floor((segment_ref + t * 16000) * ratio) + input_offset
//! ```

use crate::dsp::resampler::RECOGNITION_SAMPLE_RATE;
use crate::types::PendingMatch;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeBase {
    /// 16 kHz samples taken off the ingest queue (fed or skipped).
    popped: u64,
    /// `popped` at the last stream reset. Token times count from here.
    segment_ref: u64,
    /// Host sample aligned with `popped == 0`.
    input_offset: i64,
    /// `input_offset` when the previous chunk was popped.
    last_feed_offset: i64,
}

impl TimeBase {
    /// Start while audio may already be flowing: whatever is still queued
    /// was written most recently.
    pub fn starting_at(total_written: u64, queued: usize, ratio: f64) -> Self {
        let backlog = (queued as f64 * ratio) as i64;
        let offset = (total_written as i64 - backlog).max(0);
        Self {
            popped: 0,
            segment_ref: 0,
            input_offset: offset,
            last_feed_offset: offset,
        }
    }

    pub fn popped(&self) -> u64 {
        self.popped
    }

    pub fn segment_ref(&self) -> u64 {
        self.segment_ref
    }

    pub fn input_offset(&self) -> i64 {
        self.input_offset
    }

    /// Re-derive the offset assuming nothing is queued, so the next sample
    /// popped corresponds to `total_written`. Never moves below zero.
    pub fn resync(&mut self, total_written: u64, ratio: f64) {
        let diff = total_written as i64 - (self.popped as f64 * ratio) as i64;
        if diff >= 0 {
            self.input_offset = diff;
        }
    }

    /// Full re-base after a model swap or a queue flush: resync, forget the
    /// previous feed position and start a new segment.
    pub fn rebase(&mut self, total_written: u64, ratio: f64) {
        self.resync(total_written, ratio);
        self.last_feed_offset = self.input_offset;
        self.segment_ref = self.popped;
    }

    /// True when the offset moved forward by more than `threshold` host
    /// samples since the previous chunk. Records the current offset either way.
    pub fn take_gap(&mut self, threshold: u64) -> bool {
        let gap = self.input_offset > self.last_feed_offset + threshold as i64;
        self.last_feed_offset = self.input_offset;
        gap
    }

    /// Account for `n` samples popped from the queue.
    pub fn advance(&mut self, n: usize) {
        self.popped += n as u64;
    }

    /// The stream was reset: token times now count from here.
    pub fn mark_segment_start(&mut self) {
        self.segment_ref = self.popped;
    }

    /// 16 kHz samples in the current segment.
    pub fn segment_len(&self) -> u64 {
        self.popped - self.segment_ref
    }
}

/// Converts recognizer-relative seconds of the current segment into a
/// widened, latency-corrected host sample span.
#[derive(Clone, Copy, Debug)]
pub struct TimeMapper {
    segment_ref: u64,
    input_offset: i64,
    ratio: f64,
    latency_samples: i64,
    margin_samples: i64,
}

impl TimeMapper {
    pub fn new(
        base: &TimeBase,
        sample_rate: u32,
        latency_offset_ms: i32,
        safety_margin_seconds: f32,
    ) -> Self {
        let sr = sample_rate as f64;
        Self {
            segment_ref: base.segment_ref,
            input_offset: base.input_offset,
            ratio: sr / RECOGNITION_SAMPLE_RATE as f64,
            latency_samples: (latency_offset_ms as f64 * 0.001 * sr).round() as i64,
            margin_samples: (safety_margin_seconds.max(0.0) as f64 * sr) as i64,
        }
    }

    /// Host sample for a recognizer time, before latency and margin.
    pub fn to_absolute(&self, t: f32) -> i64 {
        let t16k = self.segment_ref as f64 + t.max(0.0) as f64 * RECOGNITION_SAMPLE_RATE as f64;
        (t16k * self.ratio).floor() as i64 + self.input_offset
    }

    /// Span for `[start_t, end_t)`, or `None` if nothing positive remains.
    pub fn span(&self, start_t: f32, end_t: f32) -> Option<PendingMatch> {
        let start = self.to_absolute(start_t) + self.latency_samples - self.margin_samples;
        let end = self.to_absolute(end_t) + self.latency_samples + self.margin_samples;
        let start = start.max(0) as u64;
        let end = end.max(0) as u64;
        (start < end).then(|| PendingMatch::new(start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(segment_ref: u64, input_offset: i64) -> TimeBase {
        TimeBase {
            popped: segment_ref,
            segment_ref,
            input_offset,
            last_feed_offset: input_offset,
        }
    }

    #[test]
    fn test_hand_computed_span() {
        // 48 kHz host, segment started 32000 16k-samples (2 s) in, offset 1000.
        let b = base(32_000, 1000);
        let m = TimeMapper::new(&b, 48_000, 0, 0.0);
        assert_eq!(m.to_absolute(0.5), (32_000 + 8_000) * 3 + 1000);
        let span = m.span(0.5, 0.75).unwrap();
        assert_eq!(span, PendingMatch::new(121_000, 133_000));
    }

    #[test]
    fn test_latency_and_margin() {
        let b = base(32_000, 1000);
        let m = TimeMapper::new(&b, 48_000, -100, 0.15);
        let span = m.span(0.5, 0.75).unwrap();
        // -100 ms = 4800 samples left, 150 ms = 7200 samples each way.
        assert_eq!(span.start_sample, 121_000 - 4_800 - 7_200);
        assert_eq!(span.end_sample, 133_000 - 4_800 + 7_200);
    }

    #[test]
    fn test_negative_results_clamp_to_zero() {
        let b = base(0, 0);
        let m = TimeMapper::new(&b, 16_000, -100, 0.0);
        // [0.0, 0.2) shifted 1600 samples left.
        let span = m.span(0.0, 0.2).unwrap();
        assert_eq!(span, PendingMatch::new(0, 1600));
        assert!(m.span(0.0, 0.05).is_none());
    }

    #[test]
    fn test_startup_sync_discounts_backlog() {
        let b = TimeBase::starting_at(96_000, 16_000, 3.0);
        assert_eq!(b.input_offset(), 48_000);
        let b = TimeBase::starting_at(1_000, 16_000, 3.0);
        assert_eq!(b.input_offset(), 0);
    }

    #[test]
    fn test_idle_resync_detects_gap() {
        let mut b = TimeBase::starting_at(0, 0, 3.0);
        b.advance(16_000);
        b.resync(48_000, 3.0);
        assert!(!b.take_gap(24_000));

        // Ingest paused for two seconds of host audio.
        b.resync(48_000 + 96_000, 3.0);
        assert_eq!(b.input_offset(), 96_000);
        assert!(b.take_gap(24_000));
        assert!(!b.take_gap(24_000));
    }

    #[test]
    fn test_rebase_starts_new_segment() {
        let mut b = TimeBase::starting_at(0, 0, 1.0);
        b.advance(5_000);
        b.rebase(20_000, 1.0);
        assert_eq!(b.segment_ref(), 5_000);
        assert_eq!(b.segment_len(), 0);
        assert_eq!(b.input_offset(), 15_000);
        assert!(!b.take_gap(100));
    }
}
