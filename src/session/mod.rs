//! Session orchestration.
//!
//! A session wires one source through the sentence pipeline to N sink
//! workers and owns every lifecycle in between:
//!
//! ```text
//! source thread ──chunks──▶ pump thread ──frames──▶ sink worker (xN)
//!                             │ parse
//!                             │ filter
//!                             │ rate limit
//!                             │ health / stats
//! ```
//!
//! The pump is synchronous per sentence. Fan-out is a `try_send` into each
//! ready sink's bounded queue: a slow or dead sink costs a counted drop,
//! never a stall of the data path or of the other sinks. Writer threads
//! preserve per-sink ordering as a side effect.

mod stats;

pub use stats::{SessionStats, StatsSnapshot};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::config::{InputConfig, OutputConfig, SessionConfig};
use crate::endpoint::{
    join_with_grace, ConnectionState, DataSink, DataSource, EndpointEvent, SourceChunk, StateCell,
    StateChange, STOP_GRACE,
};
use crate::error::{Error, Result};
use crate::nmea::{parse_chunk, Sentence};
use crate::pipeline::{HealthMonitor, RateLimiter, SentenceFilter, DEFAULT_STALE_AFTER};

/// Frames queued per sink before the dispatcher starts dropping. At 10 Hz
/// NMEA this is close to half a minute of backlog.
const SINK_QUEUE_DEPTH: usize = 256;

/// Pump poll interval; bounds how quickly shutdown is observed.
const PUMP_POLL: Duration = Duration::from_millis(100);

/// Lifecycle of the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Stopped => "stopped",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Events published to session subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        old: SessionState,
        new: SessionState,
        message: Option<String>,
    },
    SentenceReceived(Sentence),
}

/// Injectable endpoint constructors so tests (and embedders) can supply
/// their own transports.
pub type SourceFactory =
    Box<dyn Fn(&InputConfig, Sender<EndpointEvent>, StateCell) -> Result<Box<dyn DataSource>> + Send>;
pub type SinkFactory = Box<dyn Fn(&OutputConfig, StateCell) -> Result<Box<dyn DataSink>> + Send>;

type Subscribers = Arc<Mutex<Vec<Sender<SessionEvent>>>>;

/// One bridge session: start it with a configuration, stop it, watch its
/// events, poll its statistics. One session runs at a time per instance.
pub struct Session {
    state: Arc<Mutex<SessionState>>,
    stats: Arc<SessionStats>,
    subscribers: Subscribers,
    source_factory: SourceFactory,
    sink_factory: SinkFactory,
    runtime: Option<Runtime>,
}

struct Runtime {
    source: Box<dyn DataSource>,
    workers: Vec<SinkWorker>,
    pump_thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    #[allow(dead_code)]
    health: Arc<HealthMonitor>,
}

struct SinkWorker {
    cell: StateCell,
    handle: Option<JoinHandle<()>>,
}

/// Dispatcher-side view of one sink: its state cell and its queue.
struct SinkPort {
    cell: StateCell,
    queue: Sender<Vec<u8>>,
}

impl Session {
    /// Session over the real transports.
    pub fn new() -> Self {
        Session::with_factories(
            Box::new(|config, events, cell| crate::source::create_source(config, events, cell)),
            Box::new(|config, cell| crate::sink::create_sink(config, cell)),
        )
    }

    /// Session over injected transports.
    pub fn with_factories(source_factory: SourceFactory, sink_factory: SinkFactory) -> Self {
        Session {
            state: Arc::new(Mutex::new(SessionState::Stopped)),
            stats: Arc::new(SessionStats::new()),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            source_factory,
            sink_factory,
            runtime: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn statistics(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Subscribe to state changes and accepted sentences.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Bring the whole pipeline up. Legal only from the stopped state; any
    /// failure tears down whatever was already started and surfaces the
    /// error after the state collapses back to stopped.
    pub fn start(&mut self, config: SessionConfig) -> Result<()> {
        {
            let state = *self.state.lock();
            if state != SessionState::Stopped {
                return Err(Error::InvalidState(format!(
                    "session start requires stopped state (currently {})",
                    state
                )));
            }
        }
        self.set_state(SessionState::Starting, None);

        if let Err(e) = config.validate() {
            return self.fail_start(e);
        }

        self.stats.reset(SystemTime::now());

        let (events_tx, events_rx) = unbounded::<EndpointEvent>();

        let filter = config
            .filter
            .as_ref()
            .map(SentenceFilter::new)
            .unwrap_or_else(SentenceFilter::allow_all);
        let limiter = config
            .rate_limit
            .as_ref()
            .map(RateLimiter::new)
            .unwrap_or_else(RateLimiter::unlimited);
        let health = Arc::new(HealthMonitor::new(DEFAULT_STALE_AFTER));
        health.set_on_change(|old, new| log::info!("data health: {} -> {}", old, new));

        // Sinks first so nothing the source produces races an unopened
        // output.
        let mut started_sinks: Vec<(Box<dyn DataSink>, StateCell)> = Vec::new();
        for output in config.outputs.iter().filter(|o| o.enabled) {
            let cell = StateCell::new(output.kind.label(), events_tx.clone());
            let built = (self.sink_factory)(output, cell.clone())
                .and_then(|mut sink| sink.start().map(|_| sink));
            match built {
                Ok(sink) => started_sinks.push((sink, cell)),
                Err(e) => {
                    stop_sinks(started_sinks);
                    return self.fail_start(e);
                }
            }
        }

        let source_cell = StateCell::new(config.input.label(), events_tx.clone());
        let source_name = source_cell.name().to_string();
        let mut source = match (self.source_factory)(&config.input, events_tx.clone(), source_cell)
        {
            Ok(source) => source,
            Err(e) => {
                stop_sinks(started_sinks);
                return self.fail_start(e);
            }
        };
        if let Err(e) = source.start() {
            source.stop();
            stop_sinks(started_sinks);
            return self.fail_start(e);
        }

        // Workers and the pump.
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::new();
        let mut ports = Vec::new();
        for (sink, cell) in started_sinks {
            let (queue_tx, queue_rx) = bounded::<Vec<u8>>(SINK_QUEUE_DEPTH);
            match spawn_sink_worker(sink, queue_rx, Arc::clone(&shutdown), Arc::clone(&self.stats))
            {
                Ok(handle) => {
                    ports.push(SinkPort {
                        cell: cell.clone(),
                        queue: queue_tx,
                    });
                    workers.push(SinkWorker {
                        cell,
                        handle: Some(handle),
                    });
                }
                Err(e) => {
                    source.stop();
                    shutdown.store(true, Ordering::Relaxed);
                    drop(ports);
                    for worker in &mut workers {
                        if let Some(handle) = worker.handle.take() {
                            join_with_grace(worker.cell.name(), handle, STOP_GRACE);
                        }
                    }
                    return self.fail_start(e);
                }
            }
        }

        let pump = Pump {
            events: events_rx,
            shutdown: Arc::clone(&shutdown),
            filter,
            limiter,
            health: Arc::clone(&health),
            stats: Arc::clone(&self.stats),
            state: Arc::clone(&self.state),
            subscribers: Arc::clone(&self.subscribers),
            ports,
            source_name,
        };
        let pump_thread = match thread::Builder::new()
            .name("session-pump".to_string())
            .spawn(move || pump.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                source.stop();
                shutdown.store(true, Ordering::Relaxed);
                for worker in &mut workers {
                    if let Some(handle) = worker.handle.take() {
                        join_with_grace(worker.cell.name(), handle, STOP_GRACE);
                    }
                }
                return self.fail_start(e.into());
            }
        };

        self.runtime = Some(Runtime {
            source,
            workers,
            pump_thread: Some(pump_thread),
            shutdown,
            health,
        });

        self.set_state(SessionState::Running, None);
        Ok(())
    }

    /// Tear the pipeline down. Idempotent; safe from any state.
    pub fn stop(&mut self) {
        if *self.state.lock() == SessionState::Stopped {
            return;
        }
        self.set_state(SessionState::Stopping, None);

        if let Some(mut runtime) = self.runtime.take() {
            // Source first: no new chunks after this returns.
            runtime.source.stop();
            drop(runtime.source);

            runtime.shutdown.store(true, Ordering::Relaxed);
            if let Some(handle) = runtime.pump_thread.take() {
                join_with_grace("session-pump", handle, STOP_GRACE);
            }

            // The pump owned the queue senders; workers drain what is left
            // and stop their sinks on the way out.
            for worker in &mut runtime.workers {
                if let Some(handle) = worker.handle.take() {
                    join_with_grace(worker.cell.name(), handle, STOP_GRACE);
                }
            }
        }

        self.set_state(SessionState::Stopped, None);
    }

    fn set_state(&self, new: SessionState, message: Option<String>) {
        set_session_state(&self.state, &self.subscribers, new, message);
    }

    fn fail_start(&mut self, e: Error) -> Result<()> {
        log::error!("session start failed: {}", e);
        self.set_state(SessionState::Error, Some(e.to_string()));
        self.set_state(SessionState::Stopped, None);
        Err(e)
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stop_sinks(sinks: Vec<(Box<dyn DataSink>, StateCell)>) {
    for (mut sink, _) in sinks {
        sink.stop();
    }
}

fn emit_event(subscribers: &Subscribers, event: SessionEvent) {
    subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
}

fn set_session_state(
    state: &Mutex<SessionState>,
    subscribers: &Subscribers,
    new: SessionState,
    message: Option<String>,
) {
    let old = {
        let mut current = state.lock();
        if *current == new {
            return;
        }
        let old = *current;
        *current = new;
        old
    };

    match &message {
        Some(msg) => log::info!("session: {} -> {} ({})", old, new, msg),
        None => log::info!("session: {} -> {}", old, new),
    }
    emit_event(subscribers, SessionEvent::StateChanged { old, new, message });
}

/// Append CR LF to a frame unless it already carries a correct line ending,
/// so every emitted line matches reference receiver output exactly.
fn frame_line(raw: &[u8]) -> Vec<u8> {
    let mut line = Vec::with_capacity(raw.len() + 2);
    if raw.ends_with(b"\r\n") {
        line.extend_from_slice(raw);
    } else if raw.ends_with(b"\r") {
        line.extend_from_slice(raw);
        line.push(b'\n');
    } else if raw.ends_with(b"\n") {
        line.extend_from_slice(&raw[..raw.len() - 1]);
        line.extend_from_slice(b"\r\n");
    } else {
        line.extend_from_slice(raw);
        line.extend_from_slice(b"\r\n");
    }
    line
}

fn spawn_sink_worker(
    mut sink: Box<dyn DataSink>,
    queue: Receiver<Vec<u8>>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<SessionStats>,
) -> Result<JoinHandle<()>> {
    let thread_name = format!("sink-{}", sink.name());
    let handle = thread::Builder::new().name(thread_name).spawn(move || {
        loop {
            match queue.recv_timeout(PUMP_POLL) {
                Ok(line) => match sink.write(&line) {
                    Ok(()) => stats.note_sent(line.len() as u64),
                    Err(e) => {
                        stats.note_write_error();
                        log::warn!("{}: write failed: {}", sink.name(), e);
                    }
                },
                Err(RecvTimeoutError::Timeout) => {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        sink.stop();
        log::debug!("{}: sink worker exited", sink.name());
    })?;
    Ok(handle)
}

/// The session's data path, running on its own thread.
struct Pump {
    events: Receiver<EndpointEvent>,
    shutdown: Arc<AtomicBool>,
    filter: SentenceFilter,
    limiter: RateLimiter,
    health: Arc<HealthMonitor>,
    stats: Arc<SessionStats>,
    state: Arc<Mutex<SessionState>>,
    subscribers: Subscribers,
    ports: Vec<SinkPort>,
    source_name: String,
}

impl Pump {
    fn run(mut self) {
        log::debug!("session pump started");
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            match self.events.recv_timeout(PUMP_POLL) {
                Ok(EndpointEvent::Data(chunk)) => self.handle_chunk(chunk),
                Ok(EndpointEvent::State(change)) => self.handle_state_change(change),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::debug!("session pump stopped");
    }

    fn handle_chunk(&mut self, chunk: SourceChunk) {
        self.stats
            .note_chunk(chunk.bytes.len() as u64, chunk.received_at);

        let parsed = parse_chunk(&chunk.bytes, chunk.received_at);
        if parsed.malformed > 0 {
            self.stats.note_parse_errors(parsed.malformed);
            log::debug!("dropped {} malformed frames", parsed.malformed);
        }

        for sentence in parsed.sentences {
            self.stats.note_sentence();

            if !sentence.is_valid() {
                self.stats.note_checksum_error();
                log::debug!("checksum mismatch on {} frame", sentence.full_type());
                continue;
            }
            if !self.filter.allowed(&sentence) {
                log::trace!("{} filtered", sentence.full_type());
                continue;
            }
            if !self.limiter.should_emit(&sentence) {
                log::trace!("{} rate limited", sentence.full_type());
                continue;
            }

            self.health.record();
            self.stats.set_data_rate(self.health.data_rate_hz());

            // After escalation the traffic keeps being counted but goes
            // nowhere.
            if *self.state.lock() != SessionState::Running {
                continue;
            }

            emit_event(
                &self.subscribers,
                SessionEvent::SentenceReceived(sentence.clone()),
            );
            self.broadcast(&sentence);
        }
    }

    fn broadcast(&self, sentence: &Sentence) {
        let line = frame_line(sentence.raw());
        for port in &self.ports {
            if port.cell.get() != ConnectionState::Connected {
                continue;
            }
            match port.queue.try_send(line.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.stats.note_write_error();
                    log::warn!("{}: queue full, dropping frame", port.cell.name());
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }

    fn handle_state_change(&mut self, change: StateChange) {
        match &change.message {
            Some(msg) => log::info!(
                "{}: {} -> {} ({})",
                change.endpoint,
                change.old,
                change.new,
                msg
            ),
            None => log::info!("{}: {} -> {}", change.endpoint, change.old, change.new),
        }

        // Only a failed source takes the session down; sinks are isolated.
        if change.endpoint == self.source_name
            && change.new == ConnectionState::Error
            && *self.state.lock() == SessionState::Running
        {
            log::error!("{}: source failed, session entering error state", change.endpoint);
            self.health.set_error();
            set_session_state(
                &self.state,
                &self.subscribers,
                SessionState::Error,
                change.message,
            );
        }
    }
}
