//! Recognition Worker
//!
//! Background loop that turns queued 16 kHz audio into pending matches.
//!
//! # Lifecycle
//! - **Model swap**: when the desired identity differs from the bound one,
//!   the old stream is released, the new engine acquired, the ingest queue
//!   flushed and all time bookkeeping re-based.
//! - **Feeding**: one bounded chunk per iteration, gain-normalized copy,
//!   decode while ready, match, resolve, publish.
//! - **Idle**: empty queue. The input offset is re-derived from the host's
//!   sample counter so audio arriving later is timestamped correctly.
//! - **Reset**: gap, queue overflow, engine endpoint or segment age. Token
//!   times restart from the current position; processed offsets are cleared.
//!
//! Commands arrive over a channel and are drained at the top of each
//! iteration. [`RecognitionWorker::step`] runs exactly one iteration, which
//! is what the thread loop calls and what tests drive directly.

use crate::asr::cache::{EngineCache, ModelIdentity};
use crate::asr::engine::{RecognitionResult, StreamHandle};
use crate::asr::time_map::{TimeBase, TimeMapper};
use crate::config::FilterConfig;
use crate::debug::RealtimeLogReader;
use crate::dsp::agc::GainNormalizer;
use crate::dsp::resampler::{IngestResampler, RECOGNITION_SAMPLE_RATE};
use crate::matcher::{resolve, ProcessedMatchSet, ProfanityMatcher};
use crate::status::{lock, EngineState, PipelineStatus};
use crate::types::PendingMatch;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const IDLE_SLEEP: Duration = Duration::from_millis(10);
/// Initial room in the pending list, so the audio thread never grows it.
pub const PENDING_RESERVE: usize = 64;

pub enum WorkerCommand {
    ApplyConfig(Arc<FilterConfig>),
    Shutdown,
}

/// Mono 16 kHz backlog between the audio thread and the worker. Bounded: on
/// overflow the whole backlog is discarded and counted.
pub struct IngestQueue {
    samples: VecDeque<f32>,
    cap: usize,
    discarded: u64,
}

impl IngestQueue {
    /// Reserves the full capacity up front; pushes never allocate.
    pub fn with_cap(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            samples: VecDeque::with_capacity(cap + 1),
            cap,
            discarded: 0,
        }
    }

    /// Returns true when the backlog overflowed and was discarded.
    pub fn push(&mut self, sample: f32) -> bool {
        let overflow = self.samples.len() >= self.cap;
        if overflow {
            self.discarded += self.samples.len() as u64;
            self.samples.clear();
        }
        self.samples.push_back(sample);
        overflow
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples discarded by overflows since the last call.
    pub fn take_discarded(&mut self) -> u64 {
        std::mem::take(&mut self.discarded)
    }

    pub fn pop_into(&mut self, out: &mut Vec<f32>, max: usize) -> usize {
        let n = max.min(self.samples.len());
        out.clear();
        out.extend(self.samples.drain(..n));
        n
    }

    pub fn flush(&mut self) {
        self.samples.clear();
        self.discarded = 0;
    }
}

/// State shared by the audio thread, the worker and status readers.
pub struct SharedState {
    pub ingest: Mutex<IngestQueue>,
    pub pending: Mutex<Vec<PendingMatch>>,
    /// Host samples written per channel since the pipeline was created.
    pub total_written: AtomicU64,
    pub sample_rate: AtomicU32,
    pub running: AtomicBool,
    pub status: PipelineStatus,
}

impl SharedState {
    pub fn new(queue_cap: usize, sample_rate: u32) -> Self {
        Self {
            ingest: Mutex::new(IngestQueue::with_cap(queue_cap)),
            pending: Mutex::new(Vec::with_capacity(PENDING_RESERVE)),
            total_written: AtomicU64::new(0),
            sample_rate: AtomicU32::new(sample_rate.max(1)),
            running: AtomicBool::new(true),
            status: PipelineStatus::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Nothing queued.
    Idle,
    /// This many 16 kHz samples were consumed.
    Fed(usize),
    Stopped,
}

pub struct RecognitionWorker {
    shared: Arc<SharedState>,
    cache: Arc<EngineCache>,
    commands: Receiver<WorkerCommand>,
    rt_log: RealtimeLogReader,
    config: Arc<FilterConfig>,
    desired: Option<ModelIdentity>,
    /// Identity whose load failed; not retried until `desired` changes.
    failed: Option<ModelIdentity>,
    stream: Option<StreamHandle>,
    time: TimeBase,
    sample_rate: u32,
    agc: GainNormalizer,
    matcher: ProfanityMatcher,
    processed: ProcessedMatchSet,
    chunk: Vec<f32>,
}

impl RecognitionWorker {
    pub fn new(
        shared: Arc<SharedState>,
        cache: Arc<EngineCache>,
        commands: Receiver<WorkerCommand>,
        rt_log: RealtimeLogReader,
        config: Arc<FilterConfig>,
    ) -> Self {
        let sample_rate = shared.sample_rate.load(Ordering::Acquire);
        let (total_written, queued) = {
            let queue = lock(&shared.ingest);
            (shared.total_written.load(Ordering::Acquire), queue.len())
        };
        let time = TimeBase::starting_at(
            total_written,
            queued,
            IngestResampler::ratio_for(sample_rate),
        );
        let mut worker = Self {
            shared,
            cache,
            commands,
            rt_log,
            config: config.clone(),
            desired: None,
            failed: None,
            stream: None,
            time,
            sample_rate,
            agc: GainNormalizer::new(),
            matcher: ProfanityMatcher::new(config.tuning.phonetic_cache_limit),
            processed: ProcessedMatchSet::default(),
            chunk: Vec::with_capacity(config.tuning.chunk_samples),
        };
        worker.apply_config(config);
        worker
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("vxbleep-recognizer".to_string())
            .spawn(move || self.run())
    }

    pub fn run(mut self) {
        log::info!("Recognition worker started");
        while self.shared.running.load(Ordering::Acquire) {
            match self.step() {
                Step::Idle => thread::sleep(IDLE_SLEEP),
                Step::Fed(_) => {}
                Step::Stopped => break,
            }
        }
        self.stream = None;
        self.drain_realtime_log();
        log::info!("Recognition worker stopped");
    }

    pub fn time_base(&self) -> &TimeBase {
        &self.time
    }

    pub fn bound_identity(&self) -> Option<&ModelIdentity> {
        self.stream.as_ref().map(|s| s.engine().identity())
    }

    /// One loop iteration.
    pub fn step(&mut self) -> Step {
        if !self.drain_commands() || !self.shared.running.load(Ordering::Acquire) {
            return Step::Stopped;
        }
        self.drain_realtime_log();
        self.ensure_engine();
        self.track_sample_rate();
        self.feed_next_chunk()
    }

    fn drain_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(WorkerCommand::ApplyConfig(config)) => self.apply_config(config),
                Ok(WorkerCommand::Shutdown) => return false,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return true,
            }
        }
    }

    fn apply_config(&mut self, config: Arc<FilterConfig>) {
        self.matcher.refresh(
            &config.combined_words(),
            config.use_phonetic,
            config.tuning.phonetic_cache_limit,
        );
        self.agc.set_enabled(config.agc_enabled);
        self.shared
            .status
            .set_debug_log_path(config.debug_log_path.clone());

        let desired = config.model_identity();
        if desired != self.desired {
            self.failed = None;
        }
        self.desired = desired;
        self.config = config;
    }

    fn drain_realtime_log(&mut self) {
        let status = &self.shared.status;
        self.rt_log.drain(|level, msg| {
            log::log!(level, "{}", msg);
            status.record(msg);
        });
    }

    fn ensure_engine(&mut self) {
        let bound = self.bound_identity().cloned();
        if bound == self.desired {
            return;
        }
        if self.desired.is_some() && self.desired == self.failed {
            return;
        }

        let status = &self.shared.status;
        if let Some(old) = bound {
            self.stream = None;
            status.record(&format!("Model unloaded: {}", old.model_path.display()));
        }

        match self.desired.clone() {
            None => status.set_engine_state(EngineState::Absent),
            Some(id) => {
                status.set_engine_state(EngineState::Loading);
                status.record(&format!(
                    "Loading model: {} ({})",
                    id.model_path.display(),
                    id.provider
                ));
                match self.cache.acquire(&id).and_then(StreamHandle::open) {
                    Ok(handle) => {
                        self.stream = Some(handle);
                        self.failed = None;
                        status.set_engine_state(EngineState::Ready);
                        status.record("Model ready");
                    }
                    Err(e) => {
                        log::error!("Model load failed for {}: {}", id.model_path.display(), e);
                        status.set_engine_state(EngineState::Failed(e.to_string()));
                        status.record(&format!("Model load failed: {}", e));
                        self.failed = Some(id);
                    }
                }
            }
        }

        self.rebase_all();
    }

    /// Host rate change: the queued audio was timed against the old ratio.
    fn track_sample_rate(&mut self) {
        let sr = self.shared.sample_rate.load(Ordering::Acquire);
        if sr == self.sample_rate {
            return;
        }
        log::info!("Host sample rate changed: {} -> {}", self.sample_rate, sr);
        self.sample_rate = sr;
        if let Some(stream) = self.stream.as_mut() {
            stream.reset();
        }
        self.rebase_all();
    }

    fn rebase_all(&mut self) {
        // The audio thread publishes the counter under this lock, so the
        // value read here matches the emptied queue exactly.
        let tw = {
            let mut queue = lock(&self.shared.ingest);
            queue.flush();
            self.shared.total_written.load(Ordering::Acquire)
        };
        self.time
            .rebase(tw, IngestResampler::ratio_for(self.sample_rate));
        self.processed.clear();
        self.shared.status.set_queue_depth(0);
        self.shared.status.set_last_text("");
    }

    fn feed_next_chunk(&mut self) -> Step {
        let tuning = self.config.tuning;
        let ratio = IngestResampler::ratio_for(self.sample_rate);
        let (n, restart) = {
            let mut queue = lock(&self.shared.ingest);
            let tw = self.shared.total_written.load(Ordering::Acquire);
            let discarded = queue.take_discarded();
            if discarded > 0 {
                self.time.advance(discarded as usize);
            }
            if queue.is_empty() {
                drop(queue);
                self.time.resync(tw, ratio);
                self.shared.status.set_queue_depth(0);
                return Step::Idle;
            }
            let threshold =
                (tuning.gap_reset_seconds.max(0.0) as f64 * self.sample_rate as f64).round() as u64;
            let gap = self.time.take_gap(threshold);
            let n = queue.pop_into(&mut self.chunk, tuning.chunk_samples);
            self.shared.status.set_queue_depth(queue.len());
            (n, gap || discarded > 0)
        };

        if restart {
            self.restart_stream();
        }
        self.time.advance(n);

        let Some(handle) = self.stream.as_mut() else {
            return Step::Fed(n);
        };
        self.agc.process(&mut self.chunk);
        handle.feed(&self.chunk);
        let result = handle.result();
        let endpoint = handle.is_endpoint();

        if !result.is_empty() {
            self.shared.status.set_last_text(&result.text());
            self.scan(&result);
        }

        let max_segment =
            (tuning.max_segment_seconds.max(1.0) as f64 * RECOGNITION_SAMPLE_RATE as f64).round() as u64;
        if self.time.segment_len() > max_segment {
            log::info!("Periodic reset of recognition stream");
            self.shared
                .status
                .record("Periodic reset of recognition stream");
            self.reset_segment();
        } else if endpoint {
            self.reset_segment();
        }
        Step::Fed(n)
    }

    /// Discard all acoustic context: the next chunk does not continue the
    /// previous one.
    fn restart_stream(&mut self) {
        let Some(handle) = self.stream.as_mut() else {
            return;
        };
        if let Err(e) = handle.recreate() {
            log::error!("Recognition stream could not be recreated: {}", e);
            self.shared
                .status
                .set_engine_state(EngineState::Failed(e.to_string()));
            self.failed = self.bound_identity().cloned();
            self.stream = None;
        }
        self.time.mark_segment_start();
        self.processed.clear();
        self.shared.status.set_last_text("");
    }

    fn reset_segment(&mut self) {
        if let Some(handle) = self.stream.as_mut() {
            handle.reset();
        }
        self.time.mark_segment_start();
        self.processed.clear();
        self.shared.status.set_last_text("");
    }

    fn scan(&mut self, result: &RecognitionResult) {
        let mapper = TimeMapper::new(
            &self.time,
            self.sample_rate,
            self.config.latency_offset_ms,
            self.config.tuning.safety_margin_seconds,
        );
        let scan = self.matcher.find(result, &self.processed, &mapper);
        for hit in &scan.unmapped {
            self.processed.insert(hit.text_offset);
            let total = self.shared.status.add_dropped(1);
            let msg = format!(
                "Match {:?} ({:?}) dropped: span lies before the start of the stream; {} dropped so far, check the latency offset",
                hit.label, hit.origin, total
            );
            if total <= 5 || total % 10 == 0 {
                log::warn!("{}", msg);
            }
            self.shared.status.record(&msg);
        }
        if scan.candidates.is_empty() {
            return;
        }
        let accepted = resolve(
            scan.candidates,
            self.config.resolver_policy(),
            &mut self.processed,
        );

        {
            let mut pending = lock(&self.shared.pending);
            pending.extend(accepted.iter().map(|c| c.span()));
            self.shared.status.set_pending(pending.len());
        }

        for c in &accepted {
            let msg = format!(
                "Masked {:?} ({:?}) at samples {}..{}",
                c.label, c.origin, c.start_sample, c.end_sample
            );
            log::info!("{}", msg);
            self.shared.status.record(&msg);
        }
    }
}
