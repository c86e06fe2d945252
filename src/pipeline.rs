//! Censor Pipeline
//!
//! Host-agnostic audio path plus its recognition worker.
//!
//! Per callback: refresh settings (non-blocking) → write the block into the
//! delay ring → queue a mono 16 kHz copy for recognition and publish the host
//! sample counter under the queue lock → apply due pending matches → emit
//! the delayed block in place.
//!
//! # Real-time Contract
//! - No allocation outside the ring reallocation on a delay / rate / layout
//!   change, which runs under `permit_alloc`.
//! - No blocking: settings are read with `try_read`, pending matches with
//!   `try_lock` (contention just defers them to the next callback). The
//!   ingest queue lock is only ever held for a bounded copy on either side.
//! - No logging: events go through the [`RealtimeLog`] ring.

use crate::asr::worker::{RecognitionWorker, SharedState, WorkerCommand};
use crate::context::FilterContext;
use crate::debug::{realtime_log, RealtimeLog};
use crate::dsp::delay_line::DelayBuffer;
use crate::dsp::effects::{EffectRenderer, MaskEffect};
use crate::dsp::resampler::{IngestResampler, RECOGNITION_SAMPLE_RATE};
use crate::dsp::utils::frame_rms;
use crate::error::Result;
use crate::status::{lock, PipelineStatus};
use crate::{rt_info, rt_warn};
use assert_no_alloc::permit_alloc;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, TryLockError};
use std::thread::JoinHandle;

/// The part of the configuration the audio thread acts on.
#[derive(Clone, Copy, Debug, PartialEq)]
struct AudioSettings {
    enabled: bool,
    delay_seconds: f32,
    effect: MaskEffect,
    mix_percent: u32,
}

pub struct CensorPipeline {
    context: Arc<FilterContext>,
    shared: Arc<SharedState>,
    commands: Sender<WorkerCommand>,
    worker: Option<JoinHandle<()>>,
    settings: AudioSettings,
    generation: u64,
    delay: DelayBuffer,
    resampler: IngestResampler,
    rt_log: RealtimeLog,
}

impl CensorPipeline {
    /// Build the pipeline and start its worker thread.
    pub fn new(context: Arc<FilterContext>, sample_rate: u32, num_channels: usize) -> Result<Self> {
        let (mut pipeline, worker) = Self::detached(context, sample_rate, num_channels);
        pipeline.worker = Some(worker.spawn()?);
        Ok(pipeline)
    }

    /// Build the pipeline and hand back its worker un-started, so the caller
    /// decides how it runs.
    pub fn detached(
        context: Arc<FilterContext>,
        sample_rate: u32,
        num_channels: usize,
    ) -> (Self, RecognitionWorker) {
        let (tx, rx) = channel();
        // Register before reading the config so no update can fall between.
        context.register(tx.clone());
        let generation = context.generation();
        let config = context.config();

        let queue_cap =
            (config.tuning.queue_cap_seconds.max(1.0) as f64 * RECOGNITION_SAMPLE_RATE as f64).round() as usize;
        let shared = Arc::new(SharedState::new(queue_cap, sample_rate));
        let (rt_log, rt_reader) = realtime_log();
        let worker = RecognitionWorker::new(
            shared.clone(),
            context.cache().clone(),
            rx,
            rt_reader,
            config.clone(),
        );

        let settings = AudioSettings {
            enabled: config.enabled,
            delay_seconds: config.delay_seconds,
            effect: config.effect,
            mix_percent: config.mix_percent,
        };
        let mut delay = DelayBuffer::new(config.tuning.min_retention_seconds);
        delay.prepare(num_channels, sample_rate, settings.delay_seconds);

        let pipeline = Self {
            context,
            shared,
            commands: tx,
            worker: None,
            settings,
            generation,
            delay,
            resampler: IngestResampler::new(sample_rate),
            rt_log,
        };
        (pipeline, worker)
    }

    pub fn status(&self) -> &PipelineStatus {
        &self.shared.status
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn delay_samples(&self) -> usize {
        self.delay.delay_samples()
    }

    /// Process one block in place. `sample_rate` is the host's current rate.
    pub fn process(&mut self, channels: &mut [&mut [f32]], sample_rate: u32) {
        let frames = channels.first().map_or(0, |c| c.len());
        if frames == 0 {
            return;
        }
        self.refresh_settings();

        let rms = channels.iter().map(|c| frame_rms(c)).sum::<f32>() / channels.len() as f32;
        self.shared.status.set_rms(rms);

        if self.resampler.set_sample_rate(sample_rate) {
            self.shared
                .sample_rate
                .store(self.resampler.sample_rate(), Ordering::Release);
            rt_info!(self.rt_log, "Host sample rate is now {} Hz", sample_rate);
        }

        if self
            .delay
            .prepare(channels.len(), sample_rate, self.settings.delay_seconds)
        {
            rt_info!(
                self.rt_log,
                "Delay buffer reset: {} samples per channel, delay {} samples",
                self.delay.capacity(),
                self.delay.delay_samples()
            );
        }
        self.delay.write(channels);

        if self.settings.enabled {
            self.ingest(channels, frames);
        } else {
            self.shared
                .total_written
                .store(self.delay.total_written(), Ordering::Release);
        }

        if self.settings.enabled {
            self.apply_pending(sample_rate);
        }

        self.delay.read_delayed(channels);
    }

    fn refresh_settings(&mut self) {
        let generation = self.context.generation();
        if generation == self.generation {
            return;
        }
        let Some(config) = self.context.try_config() else {
            return;
        };
        self.generation = generation;
        let settings = AudioSettings {
            enabled: config.enabled,
            delay_seconds: config.delay_seconds,
            effect: config.effect,
            mix_percent: config.mix_percent,
        };
        // May be the last reference to a superseded config.
        permit_alloc(|| drop(config));

        if settings.enabled != self.settings.enabled {
            if !settings.enabled {
                self.clear_pending();
            }
            rt_info!(
                self.rt_log,
                "Censoring {}",
                if settings.enabled { "enabled" } else { "disabled" }
            );
        }
        self.settings = settings;
    }

    /// Queue the block for recognition and publish the sample counter under
    /// the same lock, so the worker never sees one without the other.
    fn ingest(&mut self, channels: &[&mut [f32]], frames: usize) {
        let scale = 1.0 / channels.len() as f32;
        let mut overflowed = false;
        let depth = {
            let mut queue = lock(&self.shared.ingest);
            self.resampler.process_with(
                frames,
                |i| channels.iter().map(|c| c[i]).sum::<f32>() * scale,
                |s| overflowed |= queue.push(s),
            );
            self.shared
                .total_written
                .store(self.delay.total_written(), Ordering::Release);
            queue.len()
        };
        self.shared.status.set_queue_depth(depth);
        if overflowed {
            let total = self.shared.status.add_overflow();
            rt_warn!(
                self.rt_log,
                "Recognition queue overflow: backlog discarded ({} so far)",
                total
            );
        }
    }

    fn apply_pending(&mut self, sample_rate: u32) {
        let mut pending = match self.shared.pending.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        if pending.is_empty() {
            return;
        }

        let renderer =
            EffectRenderer::new(self.settings.effect, self.settings.mix_percent, sample_rate);
        let status = &self.shared.status;
        let rt_log = &mut self.rt_log;
        self.delay.apply_pending(&mut pending, &renderer, |m, play_head| {
            let total = status.add_dropped(1);
            if total <= 5 || total % 10 == 0 {
                rt_warn!(
                    rt_log,
                    "Late match dropped (ends at sample {}, play head {}); {} dropped so far, increase the delay",
                    m.end_sample,
                    play_head,
                    total
                );
            }
        });
        status.set_pending(pending.len());
    }

    fn clear_pending(&mut self) {
        let mut pending = match self.shared.pending.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        pending.clear();
        self.shared.status.set_pending(0);
    }

    /// Zero the retained audio (host transport reset). Pending matches and
    /// the sample clock are kept.
    pub fn reset(&mut self) {
        self.delay.clear();
    }
}

impl Drop for CensorPipeline {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        let _ = self.commands.send(WorkerCommand::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("Recognition worker panicked");
            }
        }
    }
}
