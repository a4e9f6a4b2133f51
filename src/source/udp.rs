//! UDP listener source.
//!
//! Wi-Fi GNSS receivers typically push one or a few whole sentences per
//! datagram, so each received datagram becomes exactly one chunk event.

use crossbeam_channel::Sender;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::endpoint::{
    join_with_grace, ConnectionState, DataSource, EndpointEvent, SourceChunk, StateCell,
    STOP_GRACE,
};
use crate::error::Result;

/// Largest datagram we care about; NMEA frames are 82 bytes on paper and a
/// receiver batching a full cycle stays well under this.
const RECV_BUFFER_SIZE: usize = 4096;

/// Poll interval for the shutdown flag while blocked in `recv_from`.
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

pub struct UdpSource {
    port: u16,
    bind_address: Option<String>,
    events: Sender<EndpointEvent>,
    cell: StateCell,
    shutdown: Arc<AtomicBool>,
    receive_thread: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl UdpSource {
    pub fn new(
        port: u16,
        bind_address: Option<String>,
        events: Sender<EndpointEvent>,
        cell: StateCell,
    ) -> Self {
        UdpSource {
            port,
            bind_address,
            events,
            cell,
            shutdown: Arc::new(AtomicBool::new(false)),
            receive_thread: None,
            local_addr: None,
        }
    }

    /// Actual bound address; useful when the configured port is 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn receive_loop(
        socket: UdpSocket,
        events: Sender<EndpointEvent>,
        cell: StateCell,
        shutdown: Arc<AtomicBool>,
    ) {
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        while !shutdown.load(Ordering::Relaxed) {
            match socket.recv_from(&mut buf) {
                Ok((0, _)) => continue,
                Ok((n, _)) => {
                    // Recovered after a transient socket error.
                    if cell.get() == ConnectionState::Error {
                        cell.set(ConnectionState::Connected, None);
                    }
                    let chunk = SourceChunk {
                        bytes: buf[..n].to_vec(),
                        received_at: SystemTime::now(),
                    };
                    if events.send(EndpointEvent::Data(chunk)).is_err() {
                        break;
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
                        break;
                    }
                    log::warn!("{}: receive error: {}", cell.name(), e);
                    cell.set(ConnectionState::Error, Some(e.to_string()));
                    // Keep trying; UDP receive errors are usually transient.
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }

        log::debug!("{}: receive loop exited", cell.name());
    }
}

impl DataSource for UdpSource {
    fn name(&self) -> &str {
        self.cell.name()
    }

    fn state(&self) -> ConnectionState {
        self.cell.get()
    }

    fn start(&mut self) -> Result<()> {
        self.cell.set(ConnectionState::Connecting, None);

        let bind_ip = self.bind_address.as_deref().unwrap_or("0.0.0.0");
        let socket = match UdpSocket::bind((bind_ip, self.port)) {
            Ok(socket) => socket,
            Err(e) => {
                self.cell.set(ConnectionState::Error, Some(e.to_string()));
                return Err(e.into());
            }
        };
        if let Err(e) = socket.set_read_timeout(Some(RECV_TIMEOUT)) {
            self.cell.set(ConnectionState::Error, Some(e.to_string()));
            return Err(e.into());
        }
        self.local_addr = socket.local_addr().ok();

        log::info!(
            "{}: listening on {}",
            self.cell.name(),
            self.local_addr
                .map(|a| a.to_string())
                .unwrap_or_else(|| format!("{}:{}", bind_ip, self.port))
        );
        self.cell.set(ConnectionState::Connected, None);

        let events = self.events.clone();
        let cell = self.cell.clone();
        let shutdown = Arc::clone(&self.shutdown);
        self.receive_thread = Some(
            thread::Builder::new()
                .name("udp-source".to_string())
                .spawn(move || Self::receive_loop(socket, events, cell, shutdown))?,
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

impl Drop for UdpSource {
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

    #[test]
    fn test_udp_source_delivers_datagrams() {
        let (tx, rx) = unbounded();
        let cell = StateCell::new("udp:0", tx.clone());
        let mut source = UdpSource::new(0, Some("127.0.0.1".to_string()), tx, cell);

        source.start().unwrap();
        assert_eq!(source.state(), ConnectionState::Connected);
        let addr = source.local_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"$GNGLL,4916.45,N,12311.12,W,225444,A*2F\r\n", addr).unwrap();

        // Skip the connecting/connected state events, wait for the data.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut got = None;
        while std::time::Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_secs(1)) {
                Ok(EndpointEvent::Data(chunk)) => {
                    got = Some(chunk);
                    break;
                }
                Ok(EndpointEvent::State(_)) => continue,
                Err(_) => break,
            }
        }
        let chunk = got.expect("no datagram delivered");
        assert!(chunk.bytes.starts_with(b"$GNGLL"));

        source.stop();
        assert_eq!(source.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_udp_source_bind_failure_sets_error_state() {
        let (tx, _rx) = unbounded();
        let cell = StateCell::new("udp:bad", tx.clone());
        // An unroutable bind address fails immediately.
        let mut source = UdpSource::new(0, Some("203.0.113.250".to_string()), tx, cell);

        assert!(source.start().is_err());
        assert_eq!(source.state(), ConnectionState::Error);
    }
}
