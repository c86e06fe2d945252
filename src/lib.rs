pub mod asr;
pub mod config;
pub mod context;
pub mod debug;
pub mod dsp;
pub mod error;
pub mod matcher;
pub mod pipeline;
pub mod status;
pub mod types;

pub use crate::config::FilterConfig;
pub use crate::context::FilterContext;
pub use crate::error::{FilterError, Result};
pub use crate::pipeline::CensorPipeline;

use crate::asr::cache::EngineCache;
use crate::dsp::effects::MaskEffect;
use nih_plug::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

const DEFAULT_SAMPLE_RATE: f32 = 48000.0;

/// Engines are shared by every plugin instance in the host process.
static ENGINE_CACHE: OnceLock<Arc<EngineCache>> = OnceLock::new();

fn shared_engine_cache() -> Arc<EngineCache> {
    ENGINE_CACHE
        .get_or_init(|| Arc::new(EngineCache::default()))
        .clone()
}

fn format_ms(v: f32) -> String {
    format!("{:.0} ms", v)
}

fn format_hz(v: f32) -> String {
    format!("{:.0} Hz", v)
}

fn format_semitones(v: f32) -> String {
    format!("{:+.1} st", v)
}

#[derive(Enum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    #[name = "Beep"]
    Beep,
    #[name = "Silence"]
    Silence,
    #[name = "Pitch Shift"]
    PitchShift,
    #[name = "Keyed Tone"]
    KeyedTone,
}

#[derive(Params)]
pub struct BleepParams {
    #[id = "enabled"]
    pub enabled: BoolParam,

    #[id = "delay_ms"]
    pub delay_ms: FloatParam,

    #[id = "effect"]
    pub effect: EnumParam<EffectKind>,

    #[id = "tone_hz"]
    pub tone_hz: FloatParam,

    #[id = "mix"]
    pub mix: IntParam,

    #[id = "pitch_semitones"]
    pub pitch_semitones: FloatParam,

    #[id = "keyed_unit_ms"]
    pub keyed_unit_ms: FloatParam,

    /// Shifts every mapped match; positive values mask later.
    #[id = "latency_ms"]
    pub latency_ms: IntParam,

    #[id = "phonetic"]
    pub phonetic: BoolParam,

    #[id = "precision"]
    pub precision: BoolParam,

    #[id = "agc"]
    pub agc: BoolParam,

    #[persist = "model_path"]
    pub model_path: Arc<RwLock<String>>,

    #[persist = "provider"]
    pub provider: Arc<RwLock<String>>,

    #[persist = "dirty_words"]
    pub dirty_words: Arc<RwLock<String>>,

    /// Bumped by every setter below so `process` notices string edits.
    strings_revision: AtomicU64,
}

fn read_string(field: &RwLock<String>) -> String {
    match field.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

impl Default for BleepParams {
    fn default() -> Self {
        let defaults = FilterConfig::default();
        Self {
            enabled: BoolParam::new("Enabled", defaults.enabled),
            delay_ms: FloatParam::new(
                "Delay",
                defaults.delay_seconds * 1000.0,
                FloatRange::Skewed {
                    min: 10.0,
                    max: 30000.0,
                    factor: FloatRange::skew_factor(-2.0),
                },
            )
            .with_value_to_string(Arc::new(format_ms))
            .non_automatable(),
            effect: EnumParam::new("Effect", EffectKind::Beep),
            tone_hz: FloatParam::new(
                "Tone",
                1000.0,
                FloatRange::Skewed {
                    min: 50.0,
                    max: 8000.0,
                    factor: FloatRange::skew_factor(-1.0),
                },
            )
            .with_value_to_string(Arc::new(format_hz)),
            mix: IntParam::new(
                "Mix",
                defaults.mix_percent as i32,
                IntRange::Linear { min: 0, max: 100 },
            )
            .with_unit(" %"),
            pitch_semitones: FloatParam::new(
                "Pitch",
                7.0,
                FloatRange::Linear {
                    min: -12.0,
                    max: 24.0,
                },
            )
            .with_step_size(1.0)
            .with_value_to_string(Arc::new(format_semitones)),
            keyed_unit_ms: FloatParam::new(
                "Keyed Unit",
                60.0,
                FloatRange::Linear {
                    min: 20.0,
                    max: 250.0,
                },
            )
            .with_value_to_string(Arc::new(format_ms)),
            latency_ms: IntParam::new(
                "Latency Offset",
                defaults.latency_offset_ms,
                IntRange::Linear {
                    min: -2000,
                    max: 2000,
                },
            )
            .with_unit(" ms"),
            phonetic: BoolParam::new("Phonetic Matching", defaults.use_phonetic),
            precision: BoolParam::new("Precision Mode", defaults.precision_mode),
            agc: BoolParam::new("Auto Gain", defaults.agc_enabled),
            model_path: Arc::new(RwLock::new(defaults.model_path)),
            provider: Arc::new(RwLock::new(defaults.provider)),
            dirty_words: Arc::new(RwLock::new(defaults.dirty_words)),
            strings_revision: AtomicU64::new(0),
        }
    }
}

/// Plain copy of the automatable values, compared once per block.
#[derive(Clone, Copy, Debug, PartialEq)]
struct ParamSnapshot {
    enabled: bool,
    delay_ms: f32,
    effect: EffectKind,
    tone_hz: f32,
    mix: i32,
    pitch_semitones: f32,
    keyed_unit_ms: f32,
    latency_ms: i32,
    phonetic: bool,
    precision: bool,
    agc: bool,
    strings_revision: u64,
}

impl BleepParams {
    fn snapshot(&self) -> ParamSnapshot {
        ParamSnapshot {
            enabled: self.enabled.value(),
            delay_ms: self.delay_ms.value(),
            effect: self.effect.value(),
            tone_hz: self.tone_hz.value(),
            mix: self.mix.value(),
            pitch_semitones: self.pitch_semitones.value(),
            keyed_unit_ms: self.keyed_unit_ms.value(),
            latency_ms: self.latency_ms.value(),
            phonetic: self.phonetic.value(),
            precision: self.precision.value(),
            agc: self.agc.value(),
            strings_revision: self.strings_revision.load(Ordering::Acquire),
        }
    }

    fn write_string(&self, field: &RwLock<String>, value: &str) {
        match field.write() {
            Ok(mut guard) => *guard = value.to_string(),
            Err(poisoned) => *poisoned.into_inner() = value.to_string(),
        }
        self.strings_revision.fetch_add(1, Ordering::AcqRel);
    }

    /// Directory holding the recognition model. Empty unloads the engine.
    pub fn set_model_path(&self, path: &str) {
        self.write_string(&self.model_path, path);
    }

    pub fn set_provider(&self, provider: &str) {
        self.write_string(&self.provider, provider);
    }

    /// Comma-separated phrases to mask.
    pub fn set_dirty_words(&self, words: &str) {
        self.write_string(&self.dirty_words, words);
    }

    /// Overlay the plugin-owned fields onto `base`, keeping everything the
    /// plugin does not expose (built-in words, tuning, debug log).
    fn to_config(&self, base: &FilterConfig) -> FilterConfig {
        let snap = self.snapshot();
        let effect = match snap.effect {
            EffectKind::Beep => MaskEffect::Beep {
                frequency_hz: snap.tone_hz,
            },
            EffectKind::Silence => MaskEffect::Silence,
            EffectKind::PitchShift => MaskEffect::PitchShift {
                semitones: snap.pitch_semitones,
            },
            EffectKind::KeyedTone => MaskEffect::KeyedTone {
                frequency_hz: snap.tone_hz,
                unit_ms: snap.keyed_unit_ms,
            },
        };
        FilterConfig {
            enabled: snap.enabled,
            model_path: read_string(&self.model_path),
            provider: read_string(&self.provider),
            delay_seconds: snap.delay_ms / 1000.0,
            dirty_words: read_string(&self.dirty_words),
            use_phonetic: snap.phonetic,
            precision_mode: snap.precision,
            effect,
            mix_percent: snap.mix.clamp(0, 100) as u32,
            latency_offset_ms: snap.latency_ms,
            agc_enabled: snap.agc,
            ..base.clone()
        }
    }
}

/// Debug builds mirror the event history to a file unless one is configured.
#[cfg(feature = "debug")]
fn with_debug_log(mut config: FilterConfig) -> FilterConfig {
    if config.debug_log_path.is_none() {
        config.debug_log_path = Some(std::env::temp_dir().join("vxbleep_debug.log"));
    }
    config
}

#[cfg(not(feature = "debug"))]
fn with_debug_log(config: FilterConfig) -> FilterConfig {
    config
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTask {
    PublishConfig,
}

// -----------------------------------------------------------------------------
// PLUGIN STRUCT
// -----------------------------------------------------------------------------
pub struct VxBleepPlugin {
    params: Arc<BleepParams>,
    context: Arc<FilterContext>,
    pipeline: Option<CensorPipeline>,
    sample_rate: f32,
    num_channels: usize,
    last_published: Option<ParamSnapshot>,
}

impl Default for VxBleepPlugin {
    fn default() -> Self {
        Self {
            params: Arc::new(BleepParams::default()),
            context: Arc::new(FilterContext::new(
                shared_engine_cache(),
                FilterConfig::default(),
            )),
            pipeline: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            num_channels: 2,
            last_published: None,
        }
    }
}

impl Plugin for VxBleepPlugin {
    const NAME: &'static str = "VxBleep";
    const VENDOR: &'static str = "Andrzej Marczewski";
    const URL: &'static str = "";
    const EMAIL: &'static str = "";
    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(2),
            main_output_channels: NonZeroU32::new(2),
            ..AudioIOLayout::const_default()
        },
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(1),
            main_output_channels: NonZeroU32::new(1),
            ..AudioIOLayout::const_default()
        },
    ];

    const MIDI_INPUT: MidiConfig = MidiConfig::None;
    const SAMPLE_ACCURATE_AUTOMATION: bool = false;

    type SysExMessage = ();
    type BackgroundTask = FilterTask;

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    fn initialize(
        &mut self,
        audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        _context: &mut impl InitContext<Self>,
    ) -> bool {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.sample_rate = buffer_config.sample_rate;
            self.num_channels = audio_io_layout
                .main_input_channels
                .map_or(2, |n| n.get() as usize);

            // Persisted fields are restored before this point, so publish
            // the full picture once up front.
            let base = self.context.config();
            self.context
                .apply(with_debug_log(self.params.to_config(&base)));
            self.last_published = Some(self.params.snapshot());

            // The delay is intentional; it is not reported as host latency.
            self.pipeline = None;
            match CensorPipeline::new(
                self.context.clone(),
                self.sample_rate as u32,
                self.num_channels,
            ) {
                Ok(pipeline) => {
                    self.pipeline = Some(pipeline);
                    true
                }
                Err(e) => {
                    log::error!("failed to start the censor pipeline: {e}");
                    false
                }
            }
        }))
        .unwrap_or(false)
    }

    fn task_executor(&mut self) -> TaskExecutor<Self> {
        let params = self.params.clone();
        let context = self.context.clone();
        Box::new(move |task| match task {
            FilterTask::PublishConfig => {
                let base = context.config();
                context.apply(params.to_config(&base));
            }
        })
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        _aux: &mut AuxiliaryBuffers,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.process_internal(buffer, context)
        }))
        .unwrap_or(ProcessStatus::Normal)
    }

    fn reset(&mut self) {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            if let Some(pipeline) = self.pipeline.as_mut() {
                pipeline.reset();
            }
        }))
        .unwrap_or(());
    }

    fn deactivate(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            log::info!("{}", pipeline.status().report());
        }
    }
}

impl VxBleepPlugin {
    /// Typed parameter handle, for embedders that set the string fields.
    pub fn bleep_params(&self) -> Arc<BleepParams> {
        self.params.clone()
    }

    fn process_internal(
        &mut self,
        buffer: &mut Buffer,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        let snapshot = self.params.snapshot();
        if self.last_published != Some(snapshot) {
            context.execute_background(FilterTask::PublishConfig);
            self.last_published = Some(snapshot);
        }

        let sample_rate = context.transport().sample_rate;
        if sample_rate.is_finite() && sample_rate > 0.0 {
            self.sample_rate = sample_rate;
        }

        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.process(buffer.as_slice(), self.sample_rate as u32);
        }

        ProcessStatus::Normal
    }
}

impl ClapPlugin for VxBleepPlugin {
    const CLAP_ID: &'static str = "com.andrzej.vxbleep";
    const CLAP_DESCRIPTION: Option<&'static str> =
        Some("Delayed speech profanity filter");
    const CLAP_MANUAL_URL: Option<&'static str> = None;
    const CLAP_SUPPORT_URL: Option<&'static str> = None;
    const CLAP_FEATURES: &'static [ClapFeature] = &[
        ClapFeature::AudioEffect,
        ClapFeature::Utility,
        ClapFeature::Stereo,
        ClapFeature::Mono,
    ];
}

impl Vst3Plugin for VxBleepPlugin {
    const VST3_CLASS_ID: [u8; 16] = *b"VxBleepCensor_01";
    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] =
        &[Vst3SubCategory::Fx, Vst3SubCategory::Tools];
}

nih_export_clap!(VxBleepPlugin);
nih_export_vst3!(VxBleepPlugin);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_map_onto_config() {
        let params = BleepParams::default();
        *params.dirty_words.write().unwrap() = "darn, heck".to_string();
        let base = FilterConfig {
            builtin_words: "gosh".into(),
            ..FilterConfig::default()
        };

        let config = params.to_config(&base);
        assert_eq!(config.dirty_words, "darn, heck");
        assert_eq!(config.builtin_words, "gosh");
        assert!((config.delay_seconds - base.delay_seconds).abs() < 1e-6);
        assert_eq!(config.effect, MaskEffect::Beep { frequency_hz: 1000.0 });
        assert_eq!(config.mix_percent, 100);
    }

    #[test]
    fn test_string_setters_change_the_snapshot() {
        let params = BleepParams::default();
        let before = params.snapshot();
        params.set_model_path("/models/zipformer");
        let after = params.snapshot();
        assert_ne!(before, after);

        params.set_dirty_words("darn");
        params.set_provider("cuda");
        assert_ne!(after, params.snapshot());
        let config = params.to_config(&FilterConfig::default());
        assert_eq!(config.model_path, "/models/zipformer");
        assert_eq!(config.provider, "cuda");
        assert_eq!(config.dirty_words, "darn");
    }

    #[test]
    fn test_default_snapshot_is_stable() {
        let params = BleepParams::default();
        assert_eq!(params.snapshot(), params.snapshot());
    }
}
