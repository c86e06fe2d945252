pub mod agc;
pub mod delay_line;
pub mod effects;
pub mod resampler;
pub mod utils;

pub use agc::GainNormalizer;
pub use delay_line::{DelayBuffer, MaskReport};
pub use effects::{EffectRenderer, MaskEffect};
pub use resampler::{IngestResampler, RECOGNITION_SAMPLE_RATE};
