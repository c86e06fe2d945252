//! Recognition Gain Normalizer
//!
//! # Perceptual Contract
//! - **Target Source**: the 16 kHz copy handed to the recognizer. Never the
//!   audio that is played back.
//! - **Intended Effect**: keep chunk peaks near a fixed level so recognition
//!   accuracy does not depend on how loud the speaker is.
//! - **Will Not Do**:
//!   - Touch the delayed output.
//!   - Boost beyond +30 dB or cut beyond -20 dB.
//!
//! # Lifecycle
//! - **Active**: one gain update per chunk, attack toward lower gain is fast,
//!   release toward higher gain is slow.
//! - **Bypassed**: gain is held at unity.

use crate::dsp::resampler::RECOGNITION_SAMPLE_RATE;
use crate::dsp::utils::{frame_peak, step_coeff};

const TARGET_PEAK: f32 = 0.6;
const MIN_GAIN: f32 = 0.1;
const MAX_GAIN: f32 = 31.6;
/// Attack (50ms): loud onsets are pulled down almost immediately.
const ATTACK_SEC: f32 = 0.05;
/// Release (1.5s): quiet stretches are brought up slowly.
const RELEASE_SEC: f32 = 1.5;
const PEAK_EPS: f32 = 1e-6;

pub struct GainNormalizer {
    enabled: bool,
    gain: f32,
}

impl Default for GainNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl GainNormalizer {
    pub fn new() -> Self {
        Self {
            enabled: false,
            gain: 1.0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.enabled = enabled;
            self.gain = 1.0;
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Normalize one 16 kHz chunk in place.
    pub fn process(&mut self, chunk: &mut [f32]) {
        if !self.enabled || chunk.is_empty() {
            return;
        }

        let peak = frame_peak(chunk).max(PEAK_EPS);
        let desired = (TARGET_PEAK / peak).clamp(MIN_GAIN, MAX_GAIN);

        let dt = chunk.len() as f32 / RECOGNITION_SAMPLE_RATE as f32;
        let tau = if desired < self.gain {
            ATTACK_SEC
        } else {
            RELEASE_SEC
        };
        let c = step_coeff(tau, dt);
        self.gain = c * self.gain + (1.0 - c) * desired;

        for s in chunk.iter_mut() {
            *s = (*s * self.gain).clamp(-1.0, 1.0);
        }
    }
}
