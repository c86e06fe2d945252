//! Masking Effects
//!
//! # Perceptual Contract
//! - **Target Source**: sample ranges of the delayed signal that the matcher
//!   flagged.
//! - **Intended Effect**: make the flagged word unintelligible while keeping
//!   the rest of the stream untouched.
//! - **Will Not Do**:
//!   - Preserve fidelity. The pitch-shifted "voice" is decorative.
//!   - Touch samples outside the flagged range.
//!
//! Every generator is a pure function of the absolute host-clock sample
//! index, so a span rendered across several callbacks stays phase-continuous.

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

const TONE_LEVEL: f32 = 0.25;
/// Grain length of the pitch shifter.
const PITCH_WINDOW_SEC: f64 = 0.030;

/// "SOS" in on/off units: dit = 1, dah = 3, gaps of 1 / 3 / 7 units.
const KEYED_PATTERN: [u8; 34] = [
    1, 0, 1, 0, 1, 0, 0, 0, // S
    1, 1, 1, 0, 1, 1, 1, 0, 1, 1, 1, 0, 0, 0, // O
    1, 0, 1, 0, 1, // S
    0, 0, 0, 0, 0, 0, 0,
];

fn default_tone_hz() -> f32 {
    1000.0
}

fn default_keyed_hz() -> f32 {
    800.0
}

fn default_semitones() -> f32 {
    7.0
}

fn default_unit_ms() -> f32 {
    60.0
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MaskEffect {
    Beep {
        #[serde(default = "default_tone_hz")]
        frequency_hz: f32,
    },
    Silence,
    /// Replays the original audio shifted up (or down) in pitch.
    PitchShift {
        #[serde(default = "default_semitones")]
        semitones: f32,
    },
    /// Tone keyed on and off like a signaling code.
    KeyedTone {
        #[serde(default = "default_keyed_hz")]
        frequency_hz: f32,
        #[serde(default = "default_unit_ms")]
        unit_ms: f32,
    },
}

impl Default for MaskEffect {
    fn default() -> Self {
        MaskEffect::Beep {
            frequency_hz: default_tone_hz(),
        }
    }
}

impl MaskEffect {
    pub fn sanitized(self) -> Self {
        match self {
            MaskEffect::Beep { frequency_hz } => MaskEffect::Beep {
                frequency_hz: sane_frequency(frequency_hz, default_tone_hz()),
            },
            MaskEffect::Silence => MaskEffect::Silence,
            MaskEffect::PitchShift { semitones } => {
                let semitones = if semitones.is_finite() && semitones.abs() >= 1.0 {
                    semitones.clamp(-12.0, 24.0)
                } else {
                    default_semitones()
                };
                MaskEffect::PitchShift { semitones }
            }
            MaskEffect::KeyedTone {
                frequency_hz,
                unit_ms,
            } => MaskEffect::KeyedTone {
                frequency_hz: sane_frequency(frequency_hz, default_keyed_hz()),
                unit_ms: if unit_ms.is_finite() {
                    unit_ms.clamp(20.0, 250.0)
                } else {
                    default_unit_ms()
                },
            },
        }
    }

    /// Effects that make no sense blended with the original word.
    pub fn forces_full_mix(&self) -> bool {
        matches!(self, MaskEffect::Silence | MaskEffect::PitchShift { .. })
    }
}

fn sane_frequency(hz: f32, fallback: f32) -> f32 {
    if hz.is_finite() && hz > 0.0 {
        hz.clamp(50.0, 8000.0)
    } else {
        fallback
    }
}

/// Read access to the clean (pre-effect) history of one channel, addressed
/// by absolute host-clock sample index.
pub trait DryHistory {
    /// Sample at `abs`, or 0.0 when it is outside the retained window.
    fn dry(&self, abs: u64) -> f32;

    /// Linearly interpolated read at a fractional absolute position.
    fn dry_frac(&self, pos: f64) -> f32 {
        if pos < 0.0 {
            return 0.0;
        }
        let i = pos.floor();
        let frac = (pos - i) as f32;
        let a = self.dry(i as u64);
        let b = self.dry(i as u64 + 1);
        a + (b - a) * frac
    }
}

/// Effect parameters resolved against the current sample rate.
#[derive(Clone, Copy, Debug)]
pub struct EffectRenderer {
    effect: MaskEffect,
    mix: f32,
    sample_rate: f64,
}

impl EffectRenderer {
    pub fn new(effect: MaskEffect, mix_percent: u32, sample_rate: u32) -> Self {
        let mix = if effect.forces_full_mix() {
            1.0
        } else {
            mix_percent.min(100) as f32 / 100.0
        };
        Self {
            effect,
            mix,
            sample_rate: sample_rate.max(1) as f64,
        }
    }

    pub fn effect(&self) -> MaskEffect {
        self.effect
    }

    pub fn mix(&self) -> f32 {
        self.mix
    }

    /// Render `[start, end)` and hand every blended sample to `write`.
    /// The effect is selected once for the whole span.
    pub fn render_span<H: DryHistory>(
        &self,
        history: &H,
        start: u64,
        end: u64,
        mut write: impl FnMut(u64, f32),
    ) {
        let mix = self.mix;
        let mut blend = |s: u64, masked: f32| {
            let original = history.dry(s);
            write(s, masked * mix + original * (1.0 - mix));
        };

        match self.effect {
            MaskEffect::Silence => {
                for s in start..end {
                    blend(s, 0.0);
                }
            }
            MaskEffect::Beep { frequency_hz } => {
                let cycles_per_sample = frequency_hz as f64 / self.sample_rate;
                for s in start..end {
                    blend(s, tone(s, cycles_per_sample));
                }
            }
            MaskEffect::KeyedTone {
                frequency_hz,
                unit_ms,
            } => {
                let cycles_per_sample = frequency_hz as f64 / self.sample_rate;
                let unit = ((unit_ms as f64 / 1000.0) * self.sample_rate).max(1.0) as u64;
                for s in start..end {
                    let key = KEYED_PATTERN[((s / unit) % KEYED_PATTERN.len() as u64) as usize];
                    let masked = if key == 1 {
                        tone(s, cycles_per_sample)
                    } else {
                        0.0
                    };
                    blend(s, masked);
                }
            }
            MaskEffect::PitchShift { semitones } => {
                let shifter = PitchTaps::new(semitones, self.sample_rate);
                for s in start..end {
                    blend(s, shifter.sample(history, s));
                }
            }
        }
    }
}

#[inline]
fn tone(s: u64, cycles_per_sample: f64) -> f32 {
    let cycles = s as f64 * cycles_per_sample;
    let phase = cycles - cycles.floor();
    TONE_LEVEL * (TAU * phase).sin() as f32
}

/// Dual-tap variable-delay pitch shifter. Two read taps sweep through a
/// short window at `ratio` times the write speed, half a window apart, and
/// are crossfaded with triangular weights that always sum to one.
struct PitchTaps {
    /// Change of tap delay per sample, in windows.
    sweep: f64,
    window: f64,
}

impl PitchTaps {
    fn new(semitones: f32, sample_rate: f64) -> Self {
        let ratio = 2f64.powf(semitones as f64 / 12.0);
        let window = (PITCH_WINDOW_SEC * sample_rate).max(2.0);
        Self {
            sweep: (ratio - 1.0) / window,
            window,
        }
    }

    #[inline]
    fn sample<H: DryHistory>(&self, history: &H, s: u64) -> f32 {
        let p1 = (s as f64 * self.sweep).rem_euclid(1.0);
        let p2 = (p1 + 0.5).rem_euclid(1.0);
        let tap = |p: f64| {
            let delay = self.window * (1.0 - p);
            let weight = 1.0 - (2.0 * p - 1.0).abs();
            history.dry_frac(s as f64 - delay) * weight as f32
        };
        tap(p1) + tap(p2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant(f32);

    impl DryHistory for Constant {
        fn dry(&self, _abs: u64) -> f32 {
            self.0
        }
    }

    fn render(renderer: &EffectRenderer, start: u64, end: u64, dry: f32) -> Vec<f32> {
        let mut out = Vec::new();
        renderer.render_span(&Constant(dry), start, end, |_, v| out.push(v));
        out
    }

    #[test]
    fn test_silence_ignores_mix() {
        let r = EffectRenderer::new(MaskEffect::Silence, 30, 48_000);
        assert_eq!(r.mix(), 1.0);
        assert!(render(&r, 0, 64, 0.5).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_beep_crossfades_by_mix() {
        let r = EffectRenderer::new(MaskEffect::Beep { frequency_hz: 1000.0 }, 0, 48_000);
        assert!(render(&r, 0, 64, 0.3).iter().all(|&v| (v - 0.3).abs() < 1e-6));

        let r = EffectRenderer::new(MaskEffect::Beep { frequency_hz: 1000.0 }, 100, 48_000);
        let out = render(&r, 0, 48, 0.3);
        // 1 kHz at 48 kHz: sample 12 is a quarter period.
        assert!((out[12] - TONE_LEVEL).abs() < 1e-4);
        assert!(out.iter().all(|v| v.abs() <= TONE_LEVEL + 1e-6));
    }

    #[test]
    fn test_beep_is_phase_continuous_across_spans() {
        let r = EffectRenderer::new(MaskEffect::Beep { frequency_hz: 700.0 }, 100, 44_100);
        let whole = render(&r, 1000, 1200, 0.0);
        let mut split = render(&r, 1000, 1100, 0.0);
        split.extend(render(&r, 1100, 1200, 0.0));
        assert_eq!(whole, split);
    }

    #[test]
    fn test_keyed_tone_has_gaps() {
        let effect = MaskEffect::KeyedTone {
            frequency_hz: 800.0,
            unit_ms: 50.0,
        };
        let r = EffectRenderer::new(effect, 100, 16_000);
        // unit = 800 samples; unit 1 of the pattern is off.
        let off = render(&r, 800, 1600, 0.9);
        assert!(off.iter().all(|&v| v == 0.0));
        let on = render(&r, 0, 800, 0.9);
        assert!(on.iter().any(|&v| v.abs() > 0.1));
    }

    #[test]
    fn test_pitch_shift_of_constant_is_constant() {
        let r = EffectRenderer::new(MaskEffect::PitchShift { semitones: 7.0 }, 10, 48_000);
        assert_eq!(r.mix(), 1.0);
        let out = render(&r, 10_000, 12_000, 0.4);
        assert!(out.iter().all(|&v| (v - 0.4).abs() < 1e-4));
    }

    #[test]
    fn test_sanitize_rejects_nonsense() {
        assert_eq!(
            MaskEffect::Beep { frequency_hz: -3.0 }.sanitized(),
            MaskEffect::Beep { frequency_hz: 1000.0 }
        );
        assert_eq!(
            MaskEffect::PitchShift { semitones: 0.0 }.sanitized(),
            MaskEffect::PitchShift { semitones: 7.0 }
        );
    }

    #[test]
    fn test_effect_json_shape() {
        let e: MaskEffect = serde_json::from_str(r#"{ "kind": "keyed_tone" }"#).unwrap();
        assert_eq!(
            e,
            MaskEffect::KeyedTone {
                frequency_hz: 800.0,
                unit_ms: 60.0
            }
        );
    }
}
