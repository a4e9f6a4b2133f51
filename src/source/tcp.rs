//! TCP client source with automatic reconnect.
//!
//! The receiver is the server here (e.g. a GNSS unit exposing a raw NMEA
//! port); the bridge dials out and keeps redialing for as long as the
//! session runs. A dropped connection parks the source in the
//! reconnecting state, never in error, so the session stays up across
//! receiver reboots.

use crossbeam_channel::Sender;
use std::io::Read;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::endpoint::{
    join_with_grace, sleep_cancellable, ConnectionState, DataSource, EndpointEvent, SourceChunk,
    StateCell, STOP_GRACE,
};
use crate::error::Result;

/// Read buffer for the byte stream; chunk boundaries are arbitrary.
const READ_BUFFER_SIZE: usize = 4096;

/// Poll interval for the shutdown flag while blocked in `read`.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Bound on one connect attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TcpClientSource {
    host: String,
    port: u16,
    reconnect_delay: Duration,
    events: Sender<EndpointEvent>,
    cell: StateCell,
    shutdown: Arc<AtomicBool>,
    receive_thread: Option<JoinHandle<()>>,
}

impl TcpClientSource {
    pub fn new(
        host: String,
        port: u16,
        reconnect_delay: Duration,
        events: Sender<EndpointEvent>,
        cell: StateCell,
    ) -> Self {
        TcpClientSource {
            host,
            port,
            reconnect_delay,
            events,
            cell,
            shutdown: Arc::new(AtomicBool::new(false)),
            receive_thread: None,
        }
    }

    fn resolve(host: &str, port: u16) -> std::io::Result<SocketAddr> {
        (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("no address for {}", host),
            )
        })
    }

    fn reconnect_loop(
        host: String,
        port: u16,
        reconnect_delay: Duration,
        events: Sender<EndpointEvent>,
        cell: StateCell,
        shutdown: Arc<AtomicBool>,
    ) {
        while !shutdown.load(Ordering::Relaxed) {
            cell.set(ConnectionState::Connecting, None);

            let stream = Self::resolve(&host, port)
                .and_then(|addr| TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT));

            match stream {
                Ok(mut stream) => {
                    if let Err(e) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
                        log::warn!("{}: failed to set read timeout: {}", cell.name(), e);
                    }
                    log::info!("{}: connected", cell.name());
                    cell.set(ConnectionState::Connected, None);

                    if Self::read_loop(&mut stream, &events, &cell, &shutdown) {
                        // Shutdown requested mid-read.
                        break;
                    }
                }
                Err(e) => {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    log::debug!("{}: connect failed: {}", cell.name(), e);
                    cell.set(ConnectionState::Reconnecting, Some(e.to_string()));
                }
            }

            sleep_cancellable(reconnect_delay, || shutdown.load(Ordering::Relaxed));
        }

        log::debug!("{}: reconnect loop exited", cell.name());
    }

    /// Read until the connection drops. Returns true when shutdown was
    /// requested, false when the peer went away and a reconnect is due.
    fn read_loop(
        stream: &mut TcpStream,
        events: &Sender<EndpointEvent>,
        cell: &StateCell,
        shutdown: &AtomicBool,
    ) -> bool {
        let mut buf = [0u8; READ_BUFFER_SIZE];

        loop {
            if shutdown.load(Ordering::Relaxed) {
                return true;
            }
            match stream.read(&mut buf) {
                Ok(0) => {
                    log::info!("{}: connection closed by remote", cell.name());
                    cell.set(
                        ConnectionState::Reconnecting,
                        Some("connection closed by remote".to_string()),
                    );
                    return false;
                }
                Ok(n) => {
                    let chunk = SourceChunk {
                        bytes: buf[..n].to_vec(),
                        received_at: SystemTime::now(),
                    };
                    if events.send(EndpointEvent::Data(chunk)).is_err() {
                        return true;
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    continue;
                }
                Err(e) => {
                    if shutdown.load(Ordering::Relaxed) {
                        return true;
                    }
                    log::info!("{}: read failed: {}", cell.name(), e);
                    cell.set(ConnectionState::Reconnecting, Some(e.to_string()));
                    return false;
                }
            }
        }
    }
}

impl DataSource for TcpClientSource {
    fn name(&self) -> &str {
        self.cell.name()
    }

    fn state(&self) -> ConnectionState {
        self.cell.get()
    }

    fn start(&mut self) -> Result<()> {
        let host = self.host.clone();
        let port = self.port;
        let reconnect_delay = self.reconnect_delay;
        let events = self.events.clone();
        let cell = self.cell.clone();
        let shutdown = Arc::clone(&self.shutdown);

        self.receive_thread = Some(
            thread::Builder::new()
                .name("tcp-source".to_string())
                .spawn(move || {
                    Self::reconnect_loop(host, port, reconnect_delay, events, cell, shutdown)
                })?,
        );

        Ok(())
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.receive_thread.take() {
            join_with_grace(self.cell.name(), handle, STOP_GRACE);
        }
        self.cell.set(ConnectionState::Disconnected, None);
    }
}

impl Drop for TcpClientSource {
    fn drop(&mut self) {
        if self.receive_thread.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::io::Write;
    use std::net::TcpListener;

    fn wait_for_state(
        rx: &crossbeam_channel::Receiver<EndpointEvent>,
        want: ConnectionState,
    ) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(500)) {
                Ok(EndpointEvent::State(change)) if change.new == want => return true,
                Ok(_) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(_) => return false,
            }
        }
        false
    }

    #[test]
    fn test_tcp_source_reads_and_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, rx) = unbounded();
        let cell = StateCell::new("tcp:test", tx.clone());
        let mut source = TcpClientSource::new(
            "127.0.0.1".to_string(),
            addr.port(),
            Duration::from_millis(200),
            tx,
            cell,
        );
        source.start().unwrap();

        // Accept, push one frame, then drop the connection.
        let (mut server_side, _) = listener.accept().unwrap();
        assert!(wait_for_state(&rx, ConnectionState::Connected));
        server_side
            .write_all(b"$GNGLL,4916.45,N,12311.12,W,225444,A*2F\r\n")
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut got_data = false;
        while std::time::Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(500)) {
                Ok(EndpointEvent::Data(chunk)) => {
                    assert!(chunk.bytes.starts_with(b"$GNGLL"));
                    got_data = true;
                    break;
                }
                _ => continue,
            }
        }
        assert!(got_data, "no data chunk received");

        // Remote close must park the source in reconnecting, not error.
        drop(server_side);
        assert!(wait_for_state(&rx, ConnectionState::Reconnecting));

        source.stop();
        assert_eq!(source.state(), ConnectionState::Disconnected);
    }
}
