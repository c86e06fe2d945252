//! Delay Ring Buffer
//!
//! Retains the last few seconds of every channel and emits each sample
//! exactly `delay_samples` after it was written. While a sample waits in
//! the ring, pending matches may overwrite it with a masking effect.
//!
//! # Design Notes
//! - Each channel keeps two rings: `wet` is what gets emitted, `dry` is the
//!   untouched input. Effects always blend against `dry`, so overlapping or
//!   repeated masks never compound and the pitch shifter replays clean audio.
//! - Capacity is `max(min_retention, 2 * delay)`. A delay, rate or layout
//!   change reallocates and zeroes the rings (a one-time glitch); the
//!   absolute sample clock keeps counting.
//! - **No Allocations** outside that reallocation.

use crate::dsp::effects::{DryHistory, EffectRenderer};
use crate::types::PendingMatch;
use assert_no_alloc::permit_alloc;

/// One ring per audio channel.
pub struct ChannelBuffer {
    wet: Vec<f32>,
    dry: Vec<f32>,
    head: usize,
    total_written: u64,
}

/// Borrowed view of a ring, addressed by absolute sample index.
struct RingView<'a> {
    samples: &'a [f32],
    head: usize,
    total_written: u64,
}

impl RingView<'_> {
    #[inline]
    fn index_of(&self, abs: u64) -> Option<usize> {
        ring_index(self.samples.len(), self.head, self.total_written, abs)
    }
}

impl DryHistory for RingView<'_> {
    #[inline]
    fn dry(&self, abs: u64) -> f32 {
        self.index_of(abs).map_or(0.0, |i| self.samples[i])
    }
}

#[inline]
fn ring_index(cap: usize, head: usize, total_written: u64, abs: u64) -> Option<usize> {
    if cap == 0 || abs >= total_written {
        return None;
    }
    let back = total_written - abs;
    if back > cap as u64 {
        return None;
    }
    Some((head + cap - back as usize) % cap)
}

impl ChannelBuffer {
    fn new(capacity: usize, total_written: u64) -> Self {
        Self {
            wet: vec![0.0; capacity],
            dry: vec![0.0; capacity],
            head: 0,
            total_written,
        }
    }

    pub fn capacity(&self) -> usize {
        self.wet.len()
    }

    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    fn write(&mut self, input: &[f32]) {
        let cap = self.wet.len();
        for &x in input {
            self.wet[self.head] = x;
            self.dry[self.head] = x;
            self.head = (self.head + 1) % cap;
        }
        self.total_written += input.len() as u64;
    }

    /// Emitted (post-effect) sample at an absolute index.
    pub fn wet_at(&self, abs: u64) -> Option<f32> {
        ring_index(self.wet.len(), self.head, self.total_written, abs).map(|i| self.wet[i])
    }

    fn render(&mut self, renderer: &EffectRenderer, start: u64, end: u64) {
        let view = RingView {
            samples: &self.dry,
            head: self.head,
            total_written: self.total_written,
        };
        let wet = &mut self.wet;
        renderer.render_span(&view, start, end, |abs, value| {
            if let Some(i) = view.index_of(abs) {
                wet[i] = value;
            }
        });
    }

    fn clear(&mut self) {
        self.wet.iter_mut().for_each(|s| *s = 0.0);
        self.dry.iter_mut().for_each(|s| *s = 0.0);
    }
}

/// Outcome of one pending-match pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaskReport {
    /// Samples (per channel) overwritten in this pass.
    pub masked_samples: u64,
    /// Matches that arrived after their audio was already played.
    pub dropped: usize,
}

pub struct DelayBuffer {
    channels: Vec<ChannelBuffer>,
    sample_rate: u32,
    delay_samples: usize,
    min_retention_seconds: f32,
}

impl DelayBuffer {
    pub fn new(min_retention_seconds: f32) -> Self {
        Self {
            channels: Vec::new(),
            sample_rate: 0,
            delay_samples: 0,
            min_retention_seconds: min_retention_seconds.max(0.0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.channels.first().map_or(0, ChannelBuffer::capacity)
    }

    pub fn delay_samples(&self) -> usize {
        self.delay_samples
    }

    pub fn channel(&self, idx: usize) -> Option<&ChannelBuffer> {
        self.channels.get(idx)
    }

    pub fn total_written(&self) -> u64 {
        self.channels.first().map_or(0, ChannelBuffer::total_written)
    }

    /// Absolute index of the sample currently being emitted.
    pub fn play_head(&self) -> u64 {
        self.total_written()
            .saturating_sub(self.delay_samples as u64)
    }

    /// Bring capacity, layout and delay in line with the host. Returns true
    /// when the rings were reallocated.
    pub fn prepare(&mut self, num_channels: usize, sample_rate: u32, delay_seconds: f32) -> bool {
        let num_channels = num_channels.max(1);
        let delay_samples = (delay_seconds.max(0.0) as f64 * sample_rate as f64).round() as usize;
        let floor = (self.min_retention_seconds as f64 * sample_rate as f64).ceil() as usize;
        let required = floor.max(delay_samples * 2).max(1);

        let current = self.capacity();
        let needs_realloc = self.channels.len() != num_channels
            || sample_rate != self.sample_rate
            || current < delay_samples * 2
            || current == 0;

        if needs_realloc {
            let total = self.total_written();
            permit_alloc(|| {
                self.channels = (0..num_channels)
                    .map(|_| ChannelBuffer::new(required, total))
                    .collect();
            });
            self.sample_rate = sample_rate;
        }

        let cap = self.capacity();
        self.delay_samples = delay_samples.min(cap.saturating_sub(1));
        needs_realloc
    }

    /// Append one block. Channels beyond the prepared layout are ignored.
    pub fn write(&mut self, inputs: &[&mut [f32]]) {
        for (ch, input) in self.channels.iter_mut().zip(inputs.iter()) {
            ch.write(input);
        }
    }

    /// Apply every due pending match to the retained audio.
    ///
    /// A match starting before the play head is clamped to it; if nothing is
    /// left it is dropped and reported through `on_drop`. Matches reaching
    /// past the write position stay queued with their start advanced.
    pub fn apply_pending(
        &mut self,
        pending: &mut Vec<PendingMatch>,
        renderer: &EffectRenderer,
        mut on_drop: impl FnMut(&PendingMatch, u64),
    ) -> MaskReport {
        let mut report = MaskReport::default();
        if self.channels.is_empty() {
            return report;
        }

        let write_pos = self.total_written();
        let play_head = self.play_head();
        let oldest = write_pos.saturating_sub(self.capacity() as u64);
        let channels = &mut self.channels;

        pending.retain_mut(|m| {
            if m.start_sample < play_head {
                m.start_sample = play_head;
            }
            if m.start_sample >= m.end_sample {
                report.dropped += 1;
                on_drop(m, play_head);
                return false;
            }
            if m.end_sample <= oldest {
                return false;
            }

            let lo = m.start_sample.max(oldest);
            let hi = m.end_sample.min(write_pos);
            if lo < hi {
                for ch in channels.iter_mut() {
                    ch.render(renderer, lo, hi);
                }
                report.masked_samples += hi - lo;
            }

            if m.end_sample > write_pos {
                m.start_sample = m.start_sample.max(write_pos);
                true
            } else {
                false
            }
        });

        report
    }

    /// Fill `outputs` with the samples written `delay_samples` before the
    /// most recent block. Positions before the start of the stream are silent.
    pub fn read_delayed(&self, outputs: &mut [&mut [f32]]) {
        let write_pos = self.total_written();
        let delay = self.delay_samples as i64;
        for (ch, out) in self.channels.iter().zip(outputs.iter_mut()) {
            let frames = out.len() as i64;
            for (i, o) in out.iter_mut().enumerate() {
                let target = write_pos as i64 - frames + i as i64 - delay;
                *o = if target < 0 {
                    0.0
                } else {
                    ch.wet_at(target as u64).unwrap_or(0.0)
                };
            }
        }
    }

    /// Zero the retained audio without touching the sample clock.
    pub fn clear(&mut self) {
        self.channels.iter_mut().for_each(ChannelBuffer::clear);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::effects::MaskEffect;

    fn run_block(buf: &mut DelayBuffer, block: &mut [f32]) {
        let mut chans = [block];
        buf.write(&chans);
        buf.read_delayed(&mut chans);
    }

    fn silence() -> EffectRenderer {
        EffectRenderer::new(MaskEffect::Silence, 100, 1000)
    }

    #[test]
    fn test_capacity_covers_twice_the_delay() {
        let mut buf = DelayBuffer::new(0.0);
        for &rate in &[16_000u32, 44_100, 48_000, 96_000] {
            for &delay in &[0.01f32, 0.5, 2.0, 7.5, 30.0] {
                buf.prepare(2, rate, delay);
                let delay_samples = (delay as f64 * rate as f64).round() as usize;
                assert_eq!(buf.delay_samples(), delay_samples, "rate {} delay {}", rate, delay);
                assert!(buf.capacity() >= 2 * delay_samples, "rate {} delay {}", rate, delay);
            }
        }
    }

    #[test]
    fn test_delay_length_rounds_to_nearest_sample() {
        let mut buf = DelayBuffer::new(0.0);
        buf.prepare(1, 16_000, 0.01);
        assert_eq!(buf.delay_samples(), 160);
        assert!(buf.capacity() >= 320);
        buf.prepare(1, 1000, 0.9);
        assert_eq!(buf.delay_samples(), 900);
    }

    #[test]
    fn test_retention_floor_and_realloc_triggers() {
        let mut buf = DelayBuffer::new(12.0);
        assert!(buf.prepare(1, 1000, 1.0));
        assert_eq!(buf.capacity(), 12_000);
        assert!(!buf.prepare(1, 1000, 3.0));
        assert!(buf.prepare(1, 1000, 8.0));
        assert_eq!(buf.capacity(), 16_000);
        assert!(buf.prepare(2, 1000, 8.0));
        assert!(buf.prepare(2, 2000, 8.0));
    }

    #[test]
    fn test_output_is_input_delayed() {
        let mut buf = DelayBuffer::new(1.0);
        buf.prepare(1, 1000, 0.1); // 100 samples
        let mut produced = Vec::new();
        for b in 0..10 {
            let mut block: Vec<f32> = (0..32).map(|i| (b * 32 + i) as f32 + 1.0).collect();
            run_block(&mut buf, &mut block);
            produced.extend(block);
        }
        for (i, &v) in produced.iter().enumerate() {
            let expected = if i < 100 { 0.0 } else { (i - 100) as f32 + 1.0 };
            assert_eq!(v, expected, "index {}", i);
        }
    }

    #[test]
    fn test_late_match_is_dropped_once() {
        let mut buf = DelayBuffer::new(1.0);
        buf.prepare(1, 1000, 0.05); // 50 samples
        let mut block = vec![0.5f32; 250];
        buf.write(&[&mut block[..]]);
        assert_eq!(buf.play_head(), 200);

        let mut pending = vec![PendingMatch::new(100, 150)];
        let mut drops = 0;
        let report = buf.apply_pending(&mut pending, &silence(), |_, head| {
            assert_eq!(head, 200);
            drops += 1;
        });
        assert_eq!(drops, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.masked_samples, 0);
        assert!(pending.is_empty());
        let ch = buf.channel(0).unwrap();
        assert!((0..250).all(|s| ch.wet_at(s) == Some(0.5)));
    }

    #[test]
    fn test_partially_late_match_is_clamped_to_play_head() {
        let mut buf = DelayBuffer::new(1.0);
        buf.prepare(1, 1000, 0.05);
        let mut block = vec![0.5f32; 250];
        buf.write(&[&mut block[..]]);

        let mut pending = vec![PendingMatch::new(180, 220)];
        let report = buf.apply_pending(&mut pending, &silence(), |_, _| panic!("not late"));
        assert_eq!(report.masked_samples, 20);
        let ch = buf.channel(0).unwrap();
        assert_eq!(ch.wet_at(199), Some(0.5));
        assert_eq!(ch.wet_at(200), Some(0.0));
        assert_eq!(ch.wet_at(219), Some(0.0));
        assert_eq!(ch.wet_at(220), Some(0.5));
    }

    #[test]
    fn test_match_beyond_write_position_carries_over() {
        let mut buf = DelayBuffer::new(1.0);
        buf.prepare(2, 1000, 0.1);
        let mut l = vec![1.0f32; 100];
        let mut r = vec![-1.0f32; 100];
        buf.write(&[&mut l[..], &mut r[..]]);

        let mut pending = vec![PendingMatch::new(90, 130)];
        buf.apply_pending(&mut pending, &silence(), |_, _| {});
        assert_eq!(pending, vec![PendingMatch::new(100, 130)]);

        let mut l = vec![1.0f32; 100];
        let mut r = vec![-1.0f32; 100];
        buf.write(&[&mut l[..], &mut r[..]]);
        buf.apply_pending(&mut pending, &silence(), |_, _| {});
        assert!(pending.is_empty());

        for ch in 0..2 {
            let c = buf.channel(ch).unwrap();
            assert!((90..130).all(|s| c.wet_at(s) == Some(0.0)));
            assert_ne!(c.wet_at(89), Some(0.0));
            assert_ne!(c.wet_at(130), Some(0.0));
        }
    }

    #[test]
    fn test_realloc_keeps_sample_clock() {
        let mut buf = DelayBuffer::new(1.0);
        buf.prepare(1, 1000, 0.1);
        let mut block = vec![0.25f32; 300];
        buf.write(&[&mut block[..]]);
        assert!(buf.prepare(1, 1000, 0.9));
        assert_eq!(buf.total_written(), 300);
        assert_eq!(buf.delay_samples(), 900);
        // Old audio is gone after the reallocation.
        assert_eq!(buf.channel(0).unwrap().wet_at(299), Some(0.0));
    }
}
