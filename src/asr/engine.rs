//! Streaming recognizer abstraction.
//!
//! The traits mirror the native streaming ABI one-to-one: an engine is built
//! from a [`RecognizerConfig`], streams are created against an engine, and a
//! stream accepts waveform, decodes while ready, reports its current result
//! and endpoint state, and can be reset. A stream must be dropped before the
//! engine it was created from; [`StreamHandle`] enforces that ordering.

use crate::asr::cache::SharedEngine;
use crate::dsp::resampler::RECOGNITION_SAMPLE_RATE;
use crate::error::{FilterError, Result};
use std::path::{Path, PathBuf};

/// Duration assumed for the final token of a result, which has no successor
/// to end it.
pub const LAST_TOKEN_SECONDS: f32 = 0.2;

/// (artifact, primary file name, fallback file name)
const ARTIFACTS: [(&str, &str, Option<&str>); 4] = [
    ("tokens.txt", "tokens.txt", None),
    (
        "encoder.onnx",
        "encoder-epoch-99-avg-1.onnx",
        Some("encoder.onnx"),
    ),
    (
        "decoder.onnx",
        "decoder-epoch-99-avg-1.onnx",
        Some("decoder.onnx"),
    ),
    (
        "joiner.onnx",
        "joiner-epoch-99-avg-1.onnx",
        Some("joiner.onnx"),
    ),
];

/// Resolved transducer model files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelArtifacts {
    pub tokens: PathBuf,
    pub encoder: PathBuf,
    pub decoder: PathBuf,
    pub joiner: PathBuf,
}

impl ModelArtifacts {
    /// Find every required file in `dir`, preferring the epoch-tagged names.
    pub fn locate(dir: &Path) -> Result<Self> {
        let mut found: [PathBuf; 4] = Default::default();
        for (slot, (artifact, primary, fallback)) in found.iter_mut().zip(ARTIFACTS.iter()) {
            let mut searched = vec![dir.join(primary)];
            if let Some(fallback) = fallback {
                searched.push(dir.join(fallback));
            }
            let hit = searched.iter().find(|p| p.is_file()).cloned();
            match hit {
                Some(path) => *slot = path,
                None => {
                    return Err(FilterError::MissingArtifact {
                        artifact: *artifact,
                        searched,
                    })
                }
            }
        }
        let [tokens, encoder, decoder, joiner] = found;
        Ok(Self {
            tokens,
            encoder,
            decoder,
            joiner,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EndpointRules {
    /// Trailing silence that ends an utterance with no decoded tokens.
    pub rule1_min_trailing_silence: f32,
    /// Trailing silence that ends an utterance after decoded tokens.
    pub rule2_min_trailing_silence: f32,
    pub rule3_min_utterance_length: f32,
}

impl Default for EndpointRules {
    fn default() -> Self {
        Self {
            rule1_min_trailing_silence: 2.4,
            rule2_min_trailing_silence: 1.2,
            rule3_min_utterance_length: 0.0,
        }
    }
}

/// Everything the native engine is constructed from.
#[derive(Clone, Debug, PartialEq)]
pub struct RecognizerConfig {
    pub sample_rate: u32,
    pub feature_dim: u32,
    pub artifacts: ModelArtifacts,
    pub provider: String,
    pub num_threads: u32,
    pub decoding_method: &'static str,
    pub max_active_paths: u32,
    pub enable_endpoint: bool,
    pub endpoint: EndpointRules,
}

impl RecognizerConfig {
    pub fn new(artifacts: ModelArtifacts, provider: &str) -> Self {
        Self {
            sample_rate: RECOGNITION_SAMPLE_RATE,
            feature_dim: 80,
            artifacts,
            provider: provider.to_string(),
            num_threads: 1,
            decoding_method: "modified_beam_search",
            max_active_paths: 4,
            enable_endpoint: true,
            endpoint: EndpointRules::default(),
        }
    }
}

/// Current hypothesis of a stream: token texts with their start times in
/// seconds relative to the last stream reset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecognitionResult {
    pub tokens: Vec<String>,
    pub timestamps: Vec<f32>,
}

impl RecognitionResult {
    pub fn new(tokens: Vec<String>, timestamps: Vec<f32>) -> Self {
        Self { tokens, timestamps }
    }

    /// Tokens that carry a timestamp.
    pub fn len(&self) -> usize {
        self.tokens.len().min(self.timestamps.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn text(&self) -> String {
        self.tokens[..self.len()].concat()
    }

    /// `[start, end)` of token `i` in seconds. A token ends where the next
    /// one starts.
    pub fn token_time(&self, i: usize) -> (f32, f32) {
        let start = self.timestamps[i];
        let end = if i + 1 < self.len() {
            self.timestamps[i + 1]
        } else {
            start + LAST_TOKEN_SECONDS
        };
        (start, end)
    }
}

pub trait RecognizerStream: Send {
    fn accept_waveform(&mut self, sample_rate: u32, samples: &[f32]);
    fn is_ready(&self) -> bool;
    fn decode(&mut self);
    fn result(&self) -> RecognitionResult;
    fn is_endpoint(&self) -> bool;
    fn reset(&mut self);
}

pub trait RecognizerEngine: Send + Sync {
    fn create_stream(&self) -> Result<Box<dyn RecognizerStream>>;
}

pub trait EngineFactory: Send + Sync {
    fn build(&self, config: &RecognizerConfig) -> Result<Box<dyn RecognizerEngine>>;
}

/// Factory used when the crate is built without a native backend.
pub struct UnavailableFactory;

impl EngineFactory for UnavailableFactory {
    fn build(&self, _config: &RecognizerConfig) -> Result<Box<dyn RecognizerEngine>> {
        Err(FilterError::EngineConstruction(
            "built without a recognition backend".to_string(),
        ))
    }
}

#[cfg(feature = "sherpa")]
pub fn default_factory() -> std::sync::Arc<dyn EngineFactory> {
    std::sync::Arc::new(crate::asr::sherpa::SherpaFactory)
}

#[cfg(not(feature = "sherpa"))]
pub fn default_factory() -> std::sync::Arc<dyn EngineFactory> {
    std::sync::Arc::new(UnavailableFactory)
}

/// A stream bound to the engine it was created from.
pub struct StreamHandle {
    // Field order matters: the stream drops before the engine.
    stream: Box<dyn RecognizerStream>,
    engine: SharedEngine,
}

impl StreamHandle {
    pub fn open(engine: SharedEngine) -> Result<Self> {
        let stream = engine.engine().create_stream()?;
        Ok(Self { stream, engine })
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    /// Feed one 16 kHz chunk and decode everything that became ready.
    pub fn feed(&mut self, samples: &[f32]) {
        self.stream
            .accept_waveform(RECOGNITION_SAMPLE_RATE, samples);
        while self.stream.is_ready() {
            self.stream.decode();
        }
    }

    pub fn result(&self) -> RecognitionResult {
        self.stream.result()
    }

    pub fn is_endpoint(&self) -> bool {
        self.stream.is_endpoint()
    }

    pub fn reset(&mut self) {
        self.stream.reset();
    }

    /// Replace the stream with a fresh one from the same engine.
    pub fn recreate(&mut self) -> Result<()> {
        let fresh = self.engine.engine().create_stream()?;
        self.stream = fresh;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_locate_prefers_epoch_names() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "tokens.txt",
            "encoder-epoch-99-avg-1.onnx",
            "encoder.onnx",
            "decoder.onnx",
            "joiner-epoch-99-avg-1.onnx",
        ] {
            touch(dir.path(), name);
        }
        let a = ModelArtifacts::locate(dir.path()).unwrap();
        assert_eq!(a.encoder, dir.path().join("encoder-epoch-99-avg-1.onnx"));
        assert_eq!(a.decoder, dir.path().join("decoder.onnx"));
        assert_eq!(a.joiner, dir.path().join("joiner-epoch-99-avg-1.onnx"));
    }

    #[test]
    fn test_locate_names_the_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["tokens.txt", "encoder.onnx", "decoder.onnx"] {
            touch(dir.path(), name);
        }
        match ModelArtifacts::locate(dir.path()) {
            Err(FilterError::MissingArtifact { artifact, searched }) => {
                assert_eq!(artifact, "joiner.onnx");
                assert_eq!(searched.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tokens_have_no_fallback_name() {
        let dir = tempfile::tempdir().unwrap();
        match ModelArtifacts::locate(dir.path()) {
            Err(FilterError::MissingArtifact { artifact, searched }) => {
                assert_eq!(artifact, "tokens.txt");
                assert_eq!(searched.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_token_times_chain_and_last_token_default() {
        let r = RecognitionResult::new(
            vec!["a".into(), "b".into(), "c".into()],
            vec![0.0, 0.4, 1.0],
        );
        assert_eq!(r.token_time(0), (0.0, 0.4));
        assert_eq!(r.token_time(1), (0.4, 1.0));
        assert_eq!(r.token_time(2), (1.0, 1.0 + LAST_TOKEN_SECONDS));
        assert_eq!(r.text(), "abc");
    }

    #[test]
    fn test_default_config_matches_streaming_transducer_setup() {
        let dir = PathBuf::from("/m");
        let artifacts = ModelArtifacts {
            tokens: dir.join("tokens.txt"),
            encoder: dir.join("encoder.onnx"),
            decoder: dir.join("decoder.onnx"),
            joiner: dir.join("joiner.onnx"),
        };
        let cfg = RecognizerConfig::new(artifacts, "cuda");
        assert_eq!(cfg.sample_rate, 16_000);
        assert_eq!(cfg.feature_dim, 80);
        assert_eq!(cfg.max_active_paths, 4);
        assert_eq!(cfg.provider, "cuda");
        assert_eq!(cfg.endpoint.rule1_min_trailing_silence, 2.4);
    }
}
