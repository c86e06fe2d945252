//! sherpa-onnx streaming transducer backend (feature `sherpa`).
//!
//! Thin wrapper over the C API. Every raw call is checked for null and
//! converted into [`FilterError::EngineConstruction`]; results are copied out
//! and freed immediately.

use crate::asr::engine::{
    EngineFactory, RecognitionResult, RecognizerConfig, RecognizerEngine, RecognizerStream,
};
use crate::error::{FilterError, Result};
use sherpa_rs_sys as sys;
use std::ffi::{CStr, CString};
use std::path::Path;

pub struct SherpaFactory;

fn c_path(path: &Path) -> Result<CString> {
    c_str(&path.to_string_lossy())
}

fn c_str(s: &str) -> Result<CString> {
    CString::new(s).map_err(|e| FilterError::EngineConstruction(e.to_string()))
}

impl EngineFactory for SherpaFactory {
    fn build(&self, config: &RecognizerConfig) -> Result<Box<dyn RecognizerEngine>> {
        let encoder = c_path(&config.artifacts.encoder)?;
        let decoder = c_path(&config.artifacts.decoder)?;
        let joiner = c_path(&config.artifacts.joiner)?;
        let tokens = c_path(&config.artifacts.tokens)?;
        let provider = c_str(&config.provider)?;
        let decoding = c_str(config.decoding_method)?;

        // SAFETY: the config is plain data; zeroed means "unset" for every
        // field the C API reads. The CStrings outlive the create call, which
        // copies what it keeps.
        let recognizer = unsafe {
            let mut c: sys::SherpaOnnxOnlineRecognizerConfig = std::mem::zeroed();
            c.feat_config.sample_rate = config.sample_rate as i32;
            c.feat_config.feature_dim = config.feature_dim as i32;
            c.model_config.transducer.encoder = encoder.as_ptr();
            c.model_config.transducer.decoder = decoder.as_ptr();
            c.model_config.transducer.joiner = joiner.as_ptr();
            c.model_config.tokens = tokens.as_ptr();
            c.model_config.num_threads = config.num_threads as i32;
            c.model_config.provider = provider.as_ptr();
            c.decoding_method = decoding.as_ptr();
            c.max_active_paths = config.max_active_paths as i32;
            c.enable_endpoint = config.enable_endpoint as i32;
            c.rule1_min_trailing_silence = config.endpoint.rule1_min_trailing_silence;
            c.rule2_min_trailing_silence = config.endpoint.rule2_min_trailing_silence;
            c.rule3_min_utterance_length = config.endpoint.rule3_min_utterance_length;
            sys::SherpaOnnxCreateOnlineRecognizer(&c)
        };

        if recognizer.is_null() {
            return Err(FilterError::EngineConstruction(
                "the recognizer rejected its configuration".to_string(),
            ));
        }
        Ok(Box::new(SherpaEngine { recognizer }))
    }
}

struct SherpaEngine {
    recognizer: *const sys::SherpaOnnxOnlineRecognizer,
}

// SAFETY: the recognizer is immutable after construction and the C API
// allows concurrent streams against one recognizer.
unsafe impl Send for SherpaEngine {}
unsafe impl Sync for SherpaEngine {}

impl RecognizerEngine for SherpaEngine {
    fn create_stream(&self) -> Result<Box<dyn RecognizerStream>> {
        let stream = unsafe { sys::SherpaOnnxCreateOnlineStream(self.recognizer) };
        if stream.is_null() {
            return Err(FilterError::EngineConstruction(
                "stream creation failed".to_string(),
            ));
        }
        Ok(Box::new(SherpaStream {
            recognizer: self.recognizer,
            stream,
        }))
    }
}

impl Drop for SherpaEngine {
    fn drop(&mut self) {
        unsafe { sys::SherpaOnnxDestroyOnlineRecognizer(self.recognizer) };
    }
}

/// Only valid while the engine that created it is alive.
struct SherpaStream {
    recognizer: *const sys::SherpaOnnxOnlineRecognizer,
    stream: *const sys::SherpaOnnxOnlineStream,
}

// SAFETY: a stream is used by one thread at a time (the worker).
unsafe impl Send for SherpaStream {}

impl RecognizerStream for SherpaStream {
    fn accept_waveform(&mut self, sample_rate: u32, samples: &[f32]) {
        unsafe {
            sys::SherpaOnnxOnlineStreamAcceptWaveform(
                self.stream,
                sample_rate as i32,
                samples.as_ptr(),
                samples.len() as i32,
            )
        };
    }

    fn is_ready(&self) -> bool {
        unsafe { sys::SherpaOnnxIsOnlineStreamReady(self.recognizer, self.stream) != 0 }
    }

    fn decode(&mut self) {
        unsafe { sys::SherpaOnnxDecodeOnlineStream(self.recognizer, self.stream) };
    }

    fn result(&self) -> RecognitionResult {
        let raw = unsafe { sys::SherpaOnnxGetOnlineStreamResult(self.recognizer, self.stream) };
        if raw.is_null() {
            return RecognitionResult::default();
        }
        let mut out = RecognitionResult::default();
        unsafe {
            let r = &*raw;
            let count = r.count.max(0) as usize;
            if count > 0 && !r.tokens_arr.is_null() && !r.timestamps.is_null() {
                let tokens = std::slice::from_raw_parts(r.tokens_arr, count);
                let times = std::slice::from_raw_parts(r.timestamps, count);
                for (&tok, &t) in tokens.iter().zip(times) {
                    if tok.is_null() {
                        continue;
                    }
                    out.tokens
                        .push(CStr::from_ptr(tok).to_string_lossy().into_owned());
                    out.timestamps.push(t);
                }
            }
            sys::SherpaOnnxDestroyOnlineRecognizerResult(raw);
        }
        out
    }

    fn is_endpoint(&self) -> bool {
        unsafe { sys::SherpaOnnxOnlineStreamIsEndpoint(self.recognizer, self.stream) != 0 }
    }

    fn reset(&mut self) {
        unsafe { sys::SherpaOnnxOnlineStreamReset(self.recognizer, self.stream) };
    }
}

impl Drop for SherpaStream {
    fn drop(&mut self) {
        unsafe { sys::SherpaOnnxDestroyOnlineStream(self.stream) };
    }
}
