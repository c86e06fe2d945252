//! Real-time safe logging for the audio thread.
//!
//! The audio thread formats into a fixed-size entry and pushes it into a
//! single-producer ring. The recognition worker owns the other end, drains it
//! every loop iteration and forwards the text to the `log` facade and the
//! event history. When the ring is full the entry is dropped.

use ringbuf::{Consumer, Producer, RingBuffer};
use std::fmt;

const LOG_CAP: usize = 64;
const LOG_MSG_MAX: usize = 256;

#[derive(Copy, Clone)]
struct LogEntry {
    level: log::Level,
    len: u16,
    bytes: [u8; LOG_MSG_MAX],
}

impl LogEntry {
    fn text(&self) -> &str {
        let len = (self.len as usize).min(LOG_MSG_MAX);
        match std::str::from_utf8(&self.bytes[..len]) {
            Ok(s) => s,
            // Truncation may split a code point; keep the valid prefix.
            Err(e) => std::str::from_utf8(&self.bytes[..e.valid_up_to()]).unwrap_or(""),
        }
    }
}

struct FixedBuf {
    buf: [u8; LOG_MSG_MAX],
    len: usize,
}

impl fmt::Write for FixedBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let avail = LOG_MSG_MAX - self.len;
        if avail == 0 {
            return Ok(());
        }
        let bytes = s.as_bytes();
        let n = bytes.len().min(avail);
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        Ok(())
    }
}

/// Audio-thread end. Never allocates, never blocks.
pub struct RealtimeLog {
    producer: Producer<LogEntry>,
}

/// Worker end.
pub struct RealtimeLogReader {
    consumer: Consumer<LogEntry>,
}

/// Create a connected writer/reader pair.
pub fn realtime_log() -> (RealtimeLog, RealtimeLogReader) {
    let (producer, consumer) = RingBuffer::<LogEntry>::new(LOG_CAP).split();
    (RealtimeLog { producer }, RealtimeLogReader { consumer })
}

impl RealtimeLog {
    pub fn log_args(&mut self, level: log::Level, args: fmt::Arguments) {
        let mut buf = FixedBuf {
            buf: [0; LOG_MSG_MAX],
            len: 0,
        };
        let _ = fmt::write(&mut buf, args);
        let entry = LogEntry {
            level,
            len: buf.len as u16,
            bytes: buf.buf,
        };
        let _ = self.producer.push(entry);
    }
}

impl RealtimeLogReader {
    /// Hand every queued entry to `sink`, oldest first.
    pub fn drain(&mut self, mut sink: impl FnMut(log::Level, &str)) -> usize {
        let mut n = 0;
        while let Some(entry) = self.consumer.pop() {
            if entry.len == 0 {
                continue;
            }
            sink(entry.level, entry.text());
            n += 1;
        }
        n
    }
}

#[macro_export]
macro_rules! rt_warn {
    ($log:expr, $($arg:tt)*) => {
        $log.log_args(::log::Level::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! rt_info {
    ($log:expr, $($arg:tt)*) => {
        $log.log_args(::log::Level::Info, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_arrive_in_order() {
        let (mut w, mut r) = realtime_log();
        rt_warn!(w, "dropped {} of {}", 1, 3);
        rt_info!(w, "rate {}", 48_000);
        let mut seen = Vec::new();
        r.drain(|level, msg| seen.push((level, msg.to_string())));
        assert_eq!(
            seen,
            vec![
                (log::Level::Warn, "dropped 1 of 3".to_string()),
                (log::Level::Info, "rate 48000".to_string())
            ]
        );
    }

    #[test]
    fn test_long_messages_truncate_and_full_ring_drops() {
        let (mut w, mut r) = realtime_log();
        let long = "x".repeat(LOG_MSG_MAX * 2);
        for _ in 0..LOG_CAP * 2 {
            rt_warn!(w, "{}", long);
        }
        let mut lens = Vec::new();
        r.drain(|_, msg| lens.push(msg.len()));
        assert!(lens.len() <= LOG_CAP);
        assert!(lens.iter().all(|&l| l == LOG_MSG_MAX));
    }
}
