//! Session statistics.
//!
//! Counters are plain atomics bumped from the pump and sink worker
//! threads; the snapshot is what status displays poll.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

#[derive(Debug, Default)]
struct Timestamps {
    session_start: Option<SystemTime>,
    last_data: Option<SystemTime>,
}

/// Monotonic session counters, shared across the session's threads.
#[derive(Debug, Default)]
pub struct SessionStats {
    sentences_received: AtomicU64,
    sentences_sent: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    parse_errors: AtomicU64,
    checksum_errors: AtomicU64,
    write_errors: AtomicU64,
    /// Current inbound rate, stored as f64 bits.
    data_rate: AtomicU64,
    timestamps: Mutex<Timestamps>,
}

impl SessionStats {
    pub fn new() -> Self {
        SessionStats::default()
    }

    /// Zero everything and stamp the session start.
    pub fn reset(&self, session_start: SystemTime) {
        self.sentences_received.store(0, Ordering::Relaxed);
        self.sentences_sent.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.parse_errors.store(0, Ordering::Relaxed);
        self.checksum_errors.store(0, Ordering::Relaxed);
        self.write_errors.store(0, Ordering::Relaxed);
        self.data_rate.store(0f64.to_bits(), Ordering::Relaxed);
        let mut ts = self.timestamps.lock();
        ts.session_start = Some(session_start);
        ts.last_data = None;
    }

    pub fn note_chunk(&self, len: u64, received_at: SystemTime) {
        self.bytes_received.fetch_add(len, Ordering::Relaxed);
        self.timestamps.lock().last_data = Some(received_at);
    }

    pub fn note_sentence(&self) {
        self.sentences_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_parse_errors(&self, count: u64) {
        self.parse_errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn note_checksum_error(&self) {
        self.checksum_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_sent(&self, len: u64) {
        self.sentences_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(len, Ordering::Relaxed);
    }

    pub fn note_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_data_rate(&self, hz: f64) {
        self.data_rate.store(hz.to_bits(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let (session_start, last_data_received) = {
            let ts = self.timestamps.lock();
            (ts.session_start, ts.last_data)
        };
        let duration = session_start.and_then(|start| SystemTime::now().duration_since(start).ok());

        StatsSnapshot {
            sentences_received: self.sentences_received.load(Ordering::Relaxed),
            sentences_sent: self.sentences_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            checksum_errors: self.checksum_errors.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            data_rate_hz: f64::from_bits(self.data_rate.load(Ordering::Relaxed)),
            session_start,
            last_data_received,
            duration,
        }
    }
}

/// Point-in-time view of the counters with derived values filled in.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub sentences_received: u64,
    pub sentences_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub parse_errors: u64,
    pub checksum_errors: u64,
    pub write_errors: u64,
    pub data_rate_hz: f64,
    pub session_start: Option<SystemTime>,
    pub last_data_received: Option<SystemTime>,
    pub duration: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = SessionStats::new();
        stats.reset(SystemTime::now());

        stats.note_chunk(100, SystemTime::now());
        stats.note_chunk(50, SystemTime::now());
        stats.note_sentence();
        stats.note_sentence();
        stats.note_checksum_error();
        stats.note_sent(42);
        stats.note_write_error();

        let snap = stats.snapshot();
        assert_eq!(snap.bytes_received, 150);
        assert_eq!(snap.sentences_received, 2);
        assert_eq!(snap.checksum_errors, 1);
        assert_eq!(snap.sentences_sent, 1);
        assert_eq!(snap.bytes_sent, 42);
        assert_eq!(snap.write_errors, 1);
        assert!(snap.last_data_received.is_some());
        assert!(snap.duration.is_some());
    }

    #[test]
    fn test_reset_zeroes_counters() {
        let stats = SessionStats::new();
        stats.note_sentence();
        stats.set_data_rate(9.5);
        stats.reset(SystemTime::now());

        let snap = stats.snapshot();
        assert_eq!(snap.sentences_received, 0);
        assert_eq!(snap.data_rate_hz, 0.0);
        assert!(snap.last_data_received.is_none());
        assert!(snap.session_start.is_some());
    }
}
