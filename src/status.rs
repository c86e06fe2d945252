//! Polled status surface shared between the audio thread, the recognition
//! worker and whoever displays it.
//!
//! Audio-thread fields are plain atomics (f32 stored as bits). Everything the
//! worker owns sits behind short-lived mutexes that the audio thread never
//! touches.

use chrono::Local;
use std::collections::VecDeque;
use std::fmt;
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

const HISTORY_LEN: usize = 50;
const HISTORY_MSG_MAX: usize = 1000;
const REPORT_HISTORY_LINES: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// No model selected, or the pipeline is disabled.
    Absent,
    Loading,
    Ready,
    Failed(String),
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Absent => write!(f, "not configured"),
            EngineState::Loading => write!(f, "loading"),
            EngineState::Ready => write!(f, "ready"),
            EngineState::Failed(msg) => write!(f, "error: {}", msg),
        }
    }
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct EventHistory {
    lines: VecDeque<String>,
    log_path: Option<PathBuf>,
}

pub struct PipelineStatus {
    rms: AtomicU32,
    queue_depth: AtomicUsize,
    pending: AtomicUsize,
    dropped: AtomicU64,
    overflows: AtomicU64,
    engine: Mutex<EngineState>,
    last_text: Mutex<String>,
    history: Mutex<EventHistory>,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStatus {
    pub fn new() -> Self {
        Self {
            rms: AtomicU32::new(0.0f32.to_bits()),
            queue_depth: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
            engine: Mutex::new(EngineState::Absent),
            last_text: Mutex::new(String::new()),
            history: Mutex::new(EventHistory::default()),
        }
    }

    pub fn set_rms(&self, val: f32) {
        self.rms.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn rms(&self) -> f32 {
        f32::from_bits(self.rms.load(Ordering::Relaxed))
    }

    pub fn set_queue_depth(&self, n: usize) {
        self.queue_depth.store(n, Ordering::Relaxed);
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn set_pending(&self, n: usize) {
        self.pending.store(n, Ordering::Relaxed);
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Returns the new total.
    pub fn add_dropped(&self, n: u64) -> u64 {
        self.dropped.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns the new total.
    pub fn add_overflow(&self) -> u64 {
        self.overflows.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    pub fn set_engine_state(&self, state: EngineState) {
        *lock(&self.engine) = state;
    }

    pub fn engine_state(&self) -> EngineState {
        lock(&self.engine).clone()
    }

    pub fn set_last_text(&self, text: &str) {
        let mut current = lock(&self.last_text);
        if *current != text {
            current.clear();
            current.push_str(text);
        }
    }

    pub fn last_text(&self) -> String {
        lock(&self.last_text).clone()
    }

    pub fn set_debug_log_path(&self, path: Option<PathBuf>) {
        lock(&self.history).log_path = path;
    }

    /// Append a timestamped event to the history (and the debug log file,
    /// when one is configured).
    pub fn record(&self, message: &str) {
        let now = Local::now();
        let msg = truncate_utf8(message, HISTORY_MSG_MAX);
        let mut history = lock(&self.history);

        if history.lines.len() >= HISTORY_LEN {
            history.lines.pop_front();
        }
        history
            .lines
            .push_back(format!("{} {}", now.format("[%H:%M:%S]"), msg));

        if let Some(path) = history.log_path.as_ref() {
            if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
                let _ = writeln!(file, "{} {}", now.format("[%Y-%m-%d %H:%M:%S]"), msg);
            }
        }
    }

    pub fn history(&self) -> Vec<String> {
        lock(&self.history).lines.iter().cloned().collect()
    }

    /// Human-readable summary of everything above.
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Engine: {}", self.engine_state());
        let _ = writeln!(out, "Input RMS: {:.4}", self.rms());
        let _ = writeln!(out, "Recognition queue: {} samples", self.queue_depth());
        let _ = writeln!(out, "Pending matches: {}", self.pending());
        let dropped = self.dropped();
        if dropped > 0 {
            let _ = writeln!(
                out,
                "Late matches dropped: {} (increase the delay)",
                dropped
            );
        } else {
            let _ = writeln!(out, "Late matches dropped: 0");
        }
        let _ = writeln!(out, "Queue overflows: {}", self.overflows());
        let _ = writeln!(out, "Last text: {}", self.last_text());

        let history = lock(&self.history);
        if !history.lines.is_empty() {
            let _ = writeln!(out, "Recent events:");
            let skip = history.lines.len().saturating_sub(REPORT_HISTORY_LINES);
            for line in history.lines.iter().skip(skip) {
                let _ = writeln!(out, "  {}", line);
            }
        }
        out
    }
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded_and_timestamped() {
        let status = PipelineStatus::new();
        for i in 0..60 {
            status.record(&format!("event {}", i));
        }
        let history = status.history();
        assert_eq!(history.len(), HISTORY_LEN);
        assert!(history[0].ends_with("event 10"));
        assert!(history[0].starts_with('['));
        assert_eq!(&history[0][9..11], "] ");
    }

    #[test]
    fn test_long_messages_are_truncated_on_char_boundary() {
        let status = PipelineStatus::new();
        status.record(&"é".repeat(800));
        let line = &status.history()[0];
        let body = &line[11..];
        assert!(body.len() <= HISTORY_MSG_MAX);
        assert!(body.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_debug_log_file_receives_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter.log");
        let status = PipelineStatus::new();
        status.set_debug_log_path(Some(path.clone()));
        status.record("engine ready");
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.trim_end().ends_with("] engine ready"));
        assert!(text.starts_with('['));
    }

    #[test]
    fn test_report_mentions_drops_and_state() {
        let status = PipelineStatus::new();
        status.set_engine_state(EngineState::Failed("missing encoder".into()));
        status.add_dropped(3);
        status.set_last_text("hello there");
        let report = status.report();
        assert!(report.contains("error: missing encoder"));
        assert!(report.contains("Late matches dropped: 3 (increase the delay)"));
        assert!(report.contains("Last text: hello there"));
    }
}
