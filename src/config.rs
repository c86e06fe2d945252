//! Filter configuration as consumed by the pipeline.
//!
//! The configuration itself is owned by whoever embeds the filter (the
//! plugin shell, a settings file, a test). This module only defines its
//! shape, defaults, sanitising rules and the derived views the pipeline
//! needs from it.

use crate::asr::ModelIdentity;
use crate::dsp::effects::MaskEffect;
use crate::error::Result;
use crate::matcher::ResolverPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_DELAY_SECONDS: f32 = 0.5;
const MIN_DELAY_SECONDS: f32 = 0.01;
const MAX_DELAY_SECONDS: f32 = 30.0;
const MAX_LATENCY_OFFSET_MS: i32 = 2000;

/// Heuristic constants tuned against real recognizers. Exposed so they can
/// be adjusted without touching the pipeline code.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Forward jump of the reconciled input offset that forces a fresh stream.
    pub gap_reset_seconds: f32,
    /// Widening applied to both ends of every accepted span.
    pub safety_margin_seconds: f32,
    /// Largest chunk (16 kHz samples) fed to the recognizer per iteration.
    pub chunk_samples: usize,
    /// Segment age that forces a stream reset.
    pub max_segment_seconds: f32,
    /// Ingest backlog (seconds of 16 kHz audio) before the queue is dropped.
    pub queue_cap_seconds: f32,
    pub phonetic_cache_limit: usize,
    /// Ring retention floor, independent of the configured delay.
    pub min_retention_seconds: f32,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            gap_reset_seconds: 0.5,
            safety_margin_seconds: 0.15,
            chunk_samples: 3200,
            max_segment_seconds: 600.0,
            queue_cap_seconds: 60.0,
            phonetic_cache_limit: 5000,
            min_retention_seconds: 12.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Master switch. Off means: keep the delay, stop censoring, unload the model.
    pub enabled: bool,
    pub model_path: String,
    pub provider: String,
    pub delay_seconds: f32,
    /// Shipped dictionary, comma separated.
    pub builtin_words: String,
    /// User dictionary, comma separated.
    pub dirty_words: String,
    pub use_phonetic: bool,
    /// Shortest-first overlap resolution instead of widest-coverage.
    pub precision_mode: bool,
    pub effect: MaskEffect,
    pub mix_percent: u32,
    /// Signed shift applied to every detected span.
    pub latency_offset_ms: i32,
    pub agc_enabled: bool,
    pub debug_log_path: Option<PathBuf>,
    pub tuning: Tuning,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_path: String::new(),
            provider: "cpu".to_string(),
            delay_seconds: DEFAULT_DELAY_SECONDS,
            builtin_words: String::new(),
            dirty_words: String::new(),
            use_phonetic: true,
            precision_mode: false,
            effect: MaskEffect::default(),
            mix_percent: 100,
            latency_offset_ms: 0,
            agc_enabled: false,
            debug_log_path: None,
            tuning: Tuning::default(),
        }
    }
}

impl FilterConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: FilterConfig = serde_json::from_str(json)?;
        Ok(cfg.sanitized())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Clamp every field into the range the pipeline can honour.
    pub fn sanitized(mut self) -> Self {
        if !self.delay_seconds.is_finite() || self.delay_seconds < MIN_DELAY_SECONDS {
            self.delay_seconds = DEFAULT_DELAY_SECONDS;
        }
        self.delay_seconds = self.delay_seconds.min(MAX_DELAY_SECONDS);
        self.mix_percent = self.mix_percent.min(100);
        self.latency_offset_ms = self
            .latency_offset_ms
            .clamp(-MAX_LATENCY_OFFSET_MS, MAX_LATENCY_OFFSET_MS);
        self.effect = self.effect.sanitized();
        if self.provider.trim().is_empty() {
            self.provider = "cpu".to_string();
        }
        self.tuning.chunk_samples = self.tuning.chunk_samples.max(160);
        self
    }

    /// Identity the worker should have loaded, or `None` when it should
    /// hold no engine at all.
    pub fn model_identity(&self) -> Option<ModelIdentity> {
        let path = self.model_path.trim();
        if !self.enabled || path.is_empty() {
            return None;
        }
        Some(ModelIdentity::new(path, self.provider.trim()))
    }

    /// Built-in and user dictionaries joined into one comma-separated string.
    /// Pattern caches are keyed on this value.
    pub fn combined_words(&self) -> String {
        let builtin = self.builtin_words.trim();
        let custom = self.dirty_words.trim();
        match (builtin.is_empty(), custom.is_empty()) {
            (true, _) => custom.to_string(),
            (false, true) => builtin.to_string(),
            (false, false) => format!("{}, {}", builtin, custom),
        }
    }

    pub fn resolver_policy(&self) -> ResolverPolicy {
        if self.precision_mode {
            ResolverPolicy::ShortestFirst
        } else {
            ResolverPolicy::WidestCoverage
        }
    }
}

/// Split a dictionary string into trimmed, non-empty phrases.
pub fn split_phrases(words: &str) -> impl Iterator<Item = &str> {
    words
        .split(',')
        .map(|item| item.trim_matches(|c: char| matches!(c, ' ' | '\t' | '\n' | '\r')))
        .filter(|item| !item.is_empty())
}
