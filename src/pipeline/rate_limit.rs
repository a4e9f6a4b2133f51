//! Minimum-interval gate over the sentence stream.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::nmea::Sentence;

/// Gate sentences to at most `max_hz` per second, globally or per sentence
/// type. Not on the hot path in any meaningful sense (NMEA runs at tens of
/// hertz), so a plain mutex around the bookkeeping is plenty.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Option<Duration>,
    per_type: bool,
    inner: Mutex<LastEmit>,
}

#[derive(Debug, Default)]
struct LastEmit {
    global: Option<Instant>,
    by_type: HashMap<String, Instant>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let interval = if config.max_hz > 0.0 {
            Some(Duration::from_secs_f64(1.0 / config.max_hz))
        } else {
            None
        };
        RateLimiter {
            interval,
            per_type: config.per_type,
            inner: Mutex::new(LastEmit::default()),
        }
    }

    /// A limiter that never gates; used when no limit is configured.
    pub fn unlimited() -> Self {
        RateLimiter::new(&RateLimitConfig::default())
    }

    /// True iff the sentence may pass. Passing updates the bookkeeping.
    pub fn should_emit(&self, sentence: &Sentence) -> bool {
        self.should_emit_at(&sentence.full_type(), Instant::now())
    }

    /// Clock-parameterised core so behaviour is testable without sleeping.
    pub fn should_emit_at(&self, full_type: &str, now: Instant) -> bool {
        let Some(interval) = self.interval else {
            return true;
        };

        let mut inner = self.inner.lock();
        let last = if self.per_type {
            inner.by_type.get(full_type).copied()
        } else {
            inner.global
        };

        let due = match last {
            Some(last) => now.saturating_duration_since(last) >= interval,
            None => true,
        };
        if due {
            if self.per_type {
                inner.by_type.insert(full_type.to_string(), now);
            } else {
                inner.global = Some(now);
            }
        }
        due
    }

    /// Forget all emit history.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.global = None;
        inner.by_type.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_hz: f64, per_type: bool) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig { max_hz, per_type })
    }

    #[test]
    fn test_disabled_when_max_hz_zero() {
        let l = limiter(0.0, false);
        let now = Instant::now();
        for _ in 0..100 {
            assert!(l.should_emit_at("GNGGA", now));
        }
    }

    #[test]
    fn test_disabled_when_max_hz_negative() {
        let l = limiter(-1.0, true);
        let now = Instant::now();
        assert!(l.should_emit_at("GNGGA", now));
        assert!(l.should_emit_at("GNGGA", now));
    }

    #[test]
    fn test_global_gate_enforces_interval() {
        let l = limiter(1.0, false);
        let t0 = Instant::now();

        assert!(l.should_emit_at("GNGGA", t0));
        assert!(!l.should_emit_at("GNGGA", t0 + Duration::from_millis(500)));
        // a different type shares the global gate
        assert!(!l.should_emit_at("GNRMC", t0 + Duration::from_millis(900)));
        assert!(l.should_emit_at("GNGGA", t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn test_per_type_gates_are_independent() {
        let l = limiter(1.0, true);
        let t0 = Instant::now();

        assert!(l.should_emit_at("GNGGA", t0));
        assert!(!l.should_emit_at("GNGGA", t0)); // immediate repeat dropped
        assert!(l.should_emit_at("GNRMC", t0)); // other type passes
        assert!(l.should_emit_at("GNGGA", t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_emit_count_bounded_over_interval() {
        // At r Hz over Δt, at most ⌈r·Δt⌉ + 1 sentences pass.
        let l = limiter(5.0, false);
        let t0 = Instant::now();
        let total = Duration::from_secs(2);

        let mut emitted = 0;
        let mut t = t0;
        while t < t0 + total {
            if l.should_emit_at("GNGGA", t) {
                emitted += 1;
            }
            t += Duration::from_millis(17); // ~59 Hz offered load
        }
        assert!(emitted <= 11, "emitted {}", emitted);
        assert!(emitted >= 9, "emitted {}", emitted);
    }

    #[test]
    fn test_reset_clears_history() {
        let l = limiter(1.0, true);
        let t0 = Instant::now();

        assert!(l.should_emit_at("GNGGA", t0));
        assert!(!l.should_emit_at("GNGGA", t0));
        l.reset();
        assert!(l.should_emit_at("GNGGA", t0));
    }
}
