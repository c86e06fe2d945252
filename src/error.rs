//! Error taxonomy for the censor pipeline.
//!
//! None of these ever reach the host as a crash: the worker converts them
//! into an engine state on the status surface and the audio path keeps
//! running as a plain delay line.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    /// No model has been selected (or the filter is master-disabled).
    #[error("not configured: select a recognition model")]
    NotConfigured,

    /// A required model file is absent under every accepted file name.
    #[error("missing model file: {artifact}")]
    MissingArtifact {
        artifact: &'static str,
        searched: Vec<PathBuf>,
    },

    /// The native engine rejected its configuration.
    #[error("recognition engine could not be created (internal error): {0}")]
    EngineConstruction(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for FilterError {
    fn from(e: serde_json::Error) -> Self {
        FilterError::InvalidConfig(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_artifact_names_the_file() {
        let err = FilterError::MissingArtifact {
            artifact: "joiner.onnx",
            searched: vec![PathBuf::from("/m/joiner-epoch-99-avg-1.onnx")],
        };
        assert!(err.to_string().contains("joiner.onnx"));
    }

    #[test]
    fn test_json_errors_become_invalid_config() {
        let err: FilterError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, FilterError::InvalidConfig(_)));
    }
}
