//! Endpoint abstractions shared by data sources and data sinks.
//!
//! Every endpoint (one source, N sinks) owns a small connection state
//! machine. State lives in a [`StateCell`] that is shared between the
//! endpoint's worker thread and the session, and every actual transition is
//! published once on the session's event channel.
//!
//! To add a new transport, implement [`DataSource`] or [`DataSink`] and
//! register it in [`crate::source::create_source`] /
//! [`crate::sink::create_sink`].

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use crate::error::Result;

/// Connection state of a single source or sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// A state transition of a named endpoint.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub endpoint: String,
    pub old: ConnectionState,
    pub new: ConnectionState,
    pub message: Option<String>,
}

/// One chunk of bytes received from the source, stamped on arrival.
#[derive(Debug, Clone)]
pub struct SourceChunk {
    pub bytes: Vec<u8>,
    pub received_at: SystemTime,
}

/// Events flowing from endpoints into the session's pump thread.
#[derive(Debug, Clone)]
pub enum EndpointEvent {
    Data(SourceChunk),
    State(StateChange),
}

/// Shared connection-state holder for one endpoint.
///
/// Cloned freely: the endpoint's worker thread mutates it, the session's
/// dispatcher reads it to decide whether a sink is worth writing to. A
/// transition to the same state is a no-op and publishes nothing.
#[derive(Clone)]
pub struct StateCell {
    inner: Arc<CellInner>,
}

struct CellInner {
    name: String,
    state: Mutex<ConnectionState>,
    events: Sender<EndpointEvent>,
}

impl StateCell {
    pub fn new(name: impl Into<String>, events: Sender<EndpointEvent>) -> Self {
        StateCell {
            inner: Arc::new(CellInner {
                name: name.into(),
                state: Mutex::new(ConnectionState::Disconnected),
                events,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn get(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Transition to `new`, publishing a [`StateChange`] once per change.
    pub fn set(&self, new: ConnectionState, message: Option<String>) {
        let old = {
            let mut state = self.inner.state.lock();
            if *state == new {
                return;
            }
            let old = *state;
            *state = new;
            old
        };

        match &message {
            Some(msg) => log::debug!("{}: {} -> {} ({})", self.inner.name, old, new, msg),
            None => log::debug!("{}: {} -> {}", self.inner.name, old, new),
        }

        // The receiver is gone during late teardown; nothing to do then.
        let _ = self.inner.events.send(EndpointEvent::State(StateChange {
            endpoint: self.inner.name.clone(),
            old,
            new,
            message,
        }));
    }
}

/// A source of raw NMEA bytes.
///
/// After `start` returns the source is expected to move toward
/// [`ConnectionState::Connected`] and publish [`EndpointEvent::Data`] chunks
/// on the event channel it was constructed with, until `stop` is called.
/// `stop` must not return while the receive thread can still publish events.
pub trait DataSource: Send {
    fn name(&self) -> &str;

    fn state(&self) -> ConnectionState;

    fn start(&mut self) -> Result<()>;

    /// Cancel the receive loop and wait for it, bounded by
    /// [`STOP_GRACE`]. Cancellation is a normal shutdown path and never
    /// leaves the source in the error state.
    fn stop(&mut self);
}

/// A sink consuming framed NMEA lines.
///
/// Writes flush per call: frames are small and latency-sensitive. A sink
/// that faults stays in the error state and is not restarted by the core.
pub trait DataSink: Send {
    fn name(&self) -> &str;

    fn state(&self) -> ConnectionState;

    /// True iff the sink is connected and its underlying handle is live.
    fn ready(&self) -> bool;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self);

    fn write(&mut self, data: &[u8]) -> Result<()>;
}

/// How long `stop` waits for a worker thread before detaching it.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Join `handle`, waiting at most `grace`. On timeout the thread is detached
/// and a warning is logged; the caller proceeds with shutdown regardless.
pub(crate) fn join_with_grace(name: &str, handle: JoinHandle<()>, grace: Duration) {
    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            log::warn!("{}: thread did not stop within {:?}, detaching", name, grace);
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        log::error!("{}: thread panicked", name);
    }
}

/// Sleep for `total`, waking early once `cancelled` returns true.
pub(crate) fn sleep_cancellable(total: Duration, cancelled: impl Fn() -> bool) {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if cancelled() {
            return;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::thread::sleep(remaining.min(Duration::from_millis(100)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_state_cell_publishes_once_per_transition() {
        let (tx, rx) = unbounded();
        let cell = StateCell::new("test", tx);

        assert_eq!(cell.get(), ConnectionState::Disconnected);

        cell.set(ConnectionState::Connecting, None);
        cell.set(ConnectionState::Connecting, None); // duplicate, no event
        cell.set(ConnectionState::Connected, None);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        match &events[0] {
            EndpointEvent::State(c) => {
                assert_eq!(c.endpoint, "test");
                assert_eq!(c.old, ConnectionState::Disconnected);
                assert_eq!(c.new, ConnectionState::Connecting);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_state_cell_carries_message() {
        let (tx, rx) = unbounded();
        let cell = StateCell::new("sink", tx);

        cell.set(ConnectionState::Error, Some("port gone".to_string()));

        match rx.try_recv().unwrap() {
            EndpointEvent::State(c) => {
                assert_eq!(c.new, ConnectionState::Error);
                assert_eq!(c.message.as_deref(), Some("port gone"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
