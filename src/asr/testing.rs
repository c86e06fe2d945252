//! Scripted recognizer for tests.
//!
//! A stream replays a fixed script: once `after_samples` 16 kHz samples have
//! been accepted since the last reset, the matching result becomes current.

use crate::asr::engine::{
    EngineFactory, RecognitionResult, RecognizerConfig, RecognizerEngine, RecognizerStream,
};
use crate::error::Result;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Clone, Debug)]
pub struct ScriptStep {
    pub after_samples: u64,
    pub result: RecognitionResult,
    pub endpoint: bool,
}

impl ScriptStep {
    pub fn new(after_samples: u64, tokens: &[&str], timestamps: &[f32]) -> Self {
        Self {
            after_samples,
            result: RecognitionResult::new(
                tokens.iter().map(|t| t.to_string()).collect(),
                timestamps.to_vec(),
            ),
            endpoint: false,
        }
    }

    pub fn with_endpoint(mut self) -> Self {
        self.endpoint = true;
        self
    }
}

#[derive(Default)]
struct Counters {
    builds: AtomicUsize,
    streams: AtomicUsize,
    resets: AtomicUsize,
    accepted: AtomicUsize,
    /// Largest absolute sample accepted, as `f32` bits.
    peak: AtomicU32,
}

pub struct ScriptedFactory {
    script: Arc<Vec<ScriptStep>>,
    counters: Arc<Counters>,
}

impl ScriptedFactory {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script: Arc::new(script),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn builds(&self) -> usize {
        self.counters.builds.load(Ordering::SeqCst)
    }

    pub fn streams(&self) -> usize {
        self.counters.streams.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.counters.resets.load(Ordering::SeqCst)
    }

    /// Total 16 kHz samples accepted by every stream.
    pub fn accepted(&self) -> usize {
        self.counters.accepted.load(Ordering::SeqCst)
    }

    /// Largest absolute sample value any stream accepted.
    pub fn accepted_peak(&self) -> f32 {
        f32::from_bits(self.counters.peak.load(Ordering::SeqCst))
    }
}

impl EngineFactory for ScriptedFactory {
    fn build(&self, _config: &RecognizerConfig) -> Result<Box<dyn RecognizerEngine>> {
        self.counters.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedEngine {
            script: self.script.clone(),
            counters: self.counters.clone(),
        }))
    }
}

struct ScriptedEngine {
    script: Arc<Vec<ScriptStep>>,
    counters: Arc<Counters>,
}

impl RecognizerEngine for ScriptedEngine {
    fn create_stream(&self) -> Result<Box<dyn RecognizerStream>> {
        self.counters.streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedStream {
            script: self.script.clone(),
            counters: self.counters.clone(),
            fed: 0,
            ready: false,
        }))
    }
}

struct ScriptedStream {
    script: Arc<Vec<ScriptStep>>,
    counters: Arc<Counters>,
    fed: u64,
    ready: bool,
}

impl ScriptedStream {
    fn current(&self) -> Option<&ScriptStep> {
        self.script
            .iter()
            .filter(|s| s.after_samples <= self.fed)
            .last()
    }
}

impl RecognizerStream for ScriptedStream {
    fn accept_waveform(&mut self, _sample_rate: u32, samples: &[f32]) {
        self.fed += samples.len() as u64;
        self.counters
            .accepted
            .fetch_add(samples.len(), Ordering::SeqCst);
        // Bit patterns of non-negative floats order like the values.
        let peak = samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
        self.counters
            .peak
            .fetch_max(peak.to_bits(), Ordering::SeqCst);
        self.ready = true;
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn decode(&mut self) {
        self.ready = false;
    }

    fn result(&self) -> RecognitionResult {
        self.current().map(|s| s.result.clone()).unwrap_or_default()
    }

    fn is_endpoint(&self) -> bool {
        self.current().map_or(false, |s| s.endpoint)
    }

    fn reset(&mut self) {
        self.counters.resets.fetch_add(1, Ordering::SeqCst);
        self.fed = 0;
    }
}

/// Temporary directory holding every required model file.
pub fn model_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in ["tokens.txt", "encoder.onnx", "decoder.onnx", "joiner.onnx"] {
        std::fs::write(dir.path().join(name), b"stub").unwrap();
    }
    dir
}
