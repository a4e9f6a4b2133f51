//! Data-liveness monitor.
//!
//! Tracks when sentences last arrived and estimates the current rate from a
//! sliding two-second window. A background tick thread demotes the status
//! to stale when the stream goes quiet; promotion back to healthy happens
//! on the next recorded sentence. The monitor never decides the stream is
//! in error by itself; that call belongs to the session.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::endpoint::{join_with_grace, STOP_GRACE};

/// Width of the rate-estimation window.
const WINDOW: Duration = Duration::from_secs(2);

/// Cadence of the staleness check.
const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Default silence threshold before the stream is considered stale.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(3);

/// Liveness of the inbound sentence stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Stale,
    Error,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Stale => "stale",
            HealthStatus::Error => "error",
        };
        f.write_str(s)
    }
}

type ChangeCallback = Box<dyn Fn(HealthStatus, HealthStatus) + Send>;

struct HealthInner {
    last_received: Option<Instant>,
    samples: VecDeque<Instant>,
    status: HealthStatus,
}

/// Sliding-window rate estimate plus liveness state.
pub struct HealthMonitor {
    inner: Arc<Mutex<HealthInner>>,
    on_change: Arc<Mutex<Option<ChangeCallback>>>,
    shutdown: Arc<AtomicBool>,
    tick_thread: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    pub fn new(stale_after: Duration) -> Self {
        let inner = Arc::new(Mutex::new(HealthInner {
            last_received: None,
            samples: VecDeque::new(),
            status: HealthStatus::Unknown,
        }));
        let on_change: Arc<Mutex<Option<ChangeCallback>>> = Arc::new(Mutex::new(None));
        let shutdown = Arc::new(AtomicBool::new(false));

        let tick_inner = Arc::clone(&inner);
        let tick_callback = Arc::clone(&on_change);
        let tick_shutdown = Arc::clone(&shutdown);
        let tick_thread = thread::Builder::new()
            .name("health-tick".to_string())
            .spawn(move || {
                let mut last_tick = Instant::now();
                while !tick_shutdown.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(100));
                    if last_tick.elapsed() >= TICK_INTERVAL {
                        last_tick = Instant::now();
                        let transition =
                            Self::check_stale(&tick_inner, stale_after, Instant::now());
                        Self::notify(&tick_callback, transition);
                    }
                }
                log::debug!("health tick thread stopped");
            })
            .ok();

        HealthMonitor {
            inner,
            on_change,
            shutdown,
            tick_thread,
        }
    }

    /// Register the status-change callback. Fired exactly once per actual
    /// transition, outside the monitor's lock.
    pub fn set_on_change(&self, callback: impl Fn(HealthStatus, HealthStatus) + Send + 'static) {
        *self.on_change.lock() = Some(Box::new(callback));
    }

    /// Note one accepted sentence.
    pub fn record(&self) {
        let transition = self.record_at(Instant::now());
        Self::notify(&self.on_change, transition);
    }

    pub fn status(&self) -> HealthStatus {
        self.inner.lock().status
    }

    /// Estimated inbound rate over the sliding window, in hertz.
    pub fn data_rate_hz(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.samples.len() < 2 {
            return 0.0;
        }
        let (Some(&oldest), Some(&newest)) = (inner.samples.front(), inner.samples.back()) else {
            return 0.0;
        };
        let span = newest.saturating_duration_since(oldest).as_secs_f64();
        if span <= 0.0 {
            return 0.0;
        }
        (inner.samples.len() - 1) as f64 / span
    }

    /// Mark the stream as failed. Session-driven; the tick never does this.
    pub fn set_error(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            Self::transition(&mut inner, HealthStatus::Error)
        };
        Self::notify(&self.on_change, transition);
    }

    /// Drop the window and return to the unknown state.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.samples.clear();
            inner.last_received = None;
            Self::transition(&mut inner, HealthStatus::Unknown)
        };
        Self::notify(&self.on_change, transition);
    }

    fn record_at(&self, now: Instant) -> Option<(HealthStatus, HealthStatus)> {
        let mut inner = self.inner.lock();
        inner.last_received = Some(now);
        inner.samples.push_back(now);
        while let Some(&front) = inner.samples.front() {
            if now.saturating_duration_since(front) > WINDOW {
                inner.samples.pop_front();
            } else {
                break;
            }
        }
        Self::transition(&mut inner, HealthStatus::Healthy)
    }

    fn check_stale(
        inner: &Mutex<HealthInner>,
        stale_after: Duration,
        now: Instant,
    ) -> Option<(HealthStatus, HealthStatus)> {
        let mut inner = inner.lock();
        if !matches!(inner.status, HealthStatus::Healthy | HealthStatus::Stale) {
            return None;
        }
        match inner.last_received {
            Some(last) if now.saturating_duration_since(last) > stale_after => {
                Self::transition(&mut inner, HealthStatus::Stale)
            }
            _ => None,
        }
    }

    fn transition(
        inner: &mut HealthInner,
        new: HealthStatus,
    ) -> Option<(HealthStatus, HealthStatus)> {
        if inner.status == new {
            return None;
        }
        let old = inner.status;
        inner.status = new;
        Some((old, new))
    }

    fn notify(
        callback: &Mutex<Option<ChangeCallback>>,
        transition: Option<(HealthStatus, HealthStatus)>,
    ) {
        if let Some((old, new)) = transition {
            log::debug!("data health: {} -> {}", old, new);
            if let Some(cb) = callback.lock().as_ref() {
                cb(old, new);
            }
        }
    }

}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.tick_thread.take() {
            join_with_grace("health-tick", handle, STOP_GRACE);
        }
    }
}
