//! Ingest Resampler
//!
//! Turns host-rate, multi-channel blocks into the mono 16 kHz stream the
//! recognizer expects.
//!
//! This is a pick decimator driven by a fractional accumulator: every input
//! frame adds 1.0, and every time the accumulator reaches `input_rate / 16000`
//! one frame is emitted as-is and the ratio is subtracted. There is no
//! anti-aliasing filter. Recognition only needs intelligible speech, and the
//! accumulator supports any host rate without precomputed tables.

pub const RECOGNITION_SAMPLE_RATE: u32 = 16_000;

pub struct IngestResampler {
    sample_rate: u32,
    ratio: f64,
    acc: f64,
}

impl IngestResampler {
    pub fn new(sample_rate: u32) -> Self {
        let sample_rate = sample_rate.max(1);
        Self {
            sample_rate,
            ratio: Self::ratio_for(sample_rate),
            acc: 0.0,
        }
    }

    /// Host rate divided by the recognition rate.
    pub fn ratio_for(sample_rate: u32) -> f64 {
        sample_rate.max(1) as f64 / RECOGNITION_SAMPLE_RATE as f64
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Track a host rate change. Returns true when the rate actually changed,
    /// in which case the accumulator starts over.
    pub fn set_sample_rate(&mut self, sample_rate: u32) -> bool {
        let sample_rate = sample_rate.max(1);
        if sample_rate == self.sample_rate {
            return false;
        }
        self.sample_rate = sample_rate;
        self.ratio = Self::ratio_for(sample_rate);
        self.acc = 0.0;
        true
    }

    /// Run `frames` input frames through the accumulator. `frame_at` is only
    /// evaluated for frames that are actually picked. Returns the number of
    /// emitted samples.
    #[inline]
    pub fn process_with(
        &mut self,
        frames: usize,
        mut frame_at: impl FnMut(usize) -> f32,
        mut emit: impl FnMut(f32),
    ) -> usize {
        let mut emitted = 0;
        for i in 0..frames {
            self.acc += 1.0;
            // `while` keeps host rates below 16 kHz working (one frame may be
            // picked more than once).
            while self.acc >= self.ratio {
                self.acc -= self.ratio;
                emit(frame_at(i));
                emitted += 1;
            }
        }
        emitted
    }

    pub fn process(&mut self, input: &[f32], emit: impl FnMut(f32)) -> usize {
        self.process_with(input.len(), |i| input[i], emit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_for(rate: u32, n: usize) -> usize {
        let mut rs = IngestResampler::new(rate);
        let input = vec![0.25f32; n];
        rs.process(&input, |_| {})
    }

    #[test]
    fn test_output_count_tracks_ratio() {
        for &rate in &[8_000u32, 16_000, 22_050, 44_100, 48_000, 96_000] {
            for &n in &[1usize, 480, 1024, 44_100] {
                let expected = (n as f64 * RECOGNITION_SAMPLE_RATE as f64 / rate as f64).floor();
                let got = count_for(rate, n) as f64;
                assert!(
                    (got - expected).abs() <= 1.0,
                    "rate {} n {}: got {} expected {}",
                    rate,
                    n,
                    got,
                    expected
                );
            }
        }
    }

    #[test]
    fn test_direct_pick_not_average() {
        let mut rs = IngestResampler::new(48_000);
        let input: Vec<f32> = (0..9).map(|i| i as f32).collect();
        let mut out = Vec::new();
        rs.process(&input, |s| out.push(s));
        assert_eq!(out, vec![2.0, 5.0, 8.0]);
    }

    #[test]
    fn test_accumulator_carries_across_blocks() {
        let mut rs = IngestResampler::new(44_100);
        let mut total = 0;
        for _ in 0..100 {
            total += rs.process(&[0.0; 441], |_| {});
        }
        assert!((total as i64 - 16_000).abs() <= 1);
    }

    #[test]
    fn test_rate_change_resets_accumulator() {
        let mut rs = IngestResampler::new(48_000);
        rs.process(&[0.0; 2], |_| {});
        assert!(rs.set_sample_rate(32_000));
        assert_eq!(rs.ratio(), 2.0);
        // Fresh accumulator: first pick lands on the second frame.
        let mut out = Vec::new();
        rs.process(&[1.0, 2.0, 3.0, 4.0], |s| out.push(s));
        assert_eq!(out, vec![2.0, 4.0]);
        assert!(!rs.set_sample_rate(32_000));
    }
}
