pub mod cache;
pub mod engine;
#[cfg(feature = "sherpa")]
pub mod sherpa;
#[cfg(test)]
pub mod testing;
pub mod time_map;
pub mod worker;

pub use cache::{EngineCache, ModelIdentity, SharedEngine};
pub use engine::{RecognitionResult, RecognizerConfig, StreamHandle};
pub use time_map::{TimeBase, TimeMapper};
pub use worker::{RecognitionWorker, SharedState, Step, WorkerCommand};
