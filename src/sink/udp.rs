//! UDP datagram sink.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};

use crate::endpoint::{ConnectionState, DataSink, StateCell};
use crate::error::{Error, Result};

/// Sends one datagram per frame to a fixed destination. The destination is
/// resolved once at start; a receiver that changes address needs a session
/// restart, which matches how chartplotter setups are actually wired.
pub struct UdpSink {
    address: String,
    port: u16,
    broadcast: bool,
    cell: StateCell,
    socket: Option<UdpSocket>,
    target: Option<SocketAddr>,
}

impl UdpSink {
    pub fn new(address: String, port: u16, broadcast: bool, cell: StateCell) -> Self {
        UdpSink {
            address,
            port,
            broadcast,
            cell,
            socket: None,
            target: None,
        }
    }

    /// Literal IP first, DNS A-record lookup second (first result wins).
    fn resolve_target(&self) -> Result<SocketAddr> {
        if let Ok(ip) = self.address.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        (self.address.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| Error::Resolve(format!("{}: {}", self.address, e)))?
            .next()
            .ok_or_else(|| Error::Resolve(self.address.clone()))
    }

    fn open(&self) -> Result<(UdpSocket, SocketAddr)> {
        let target = self.resolve_target()?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        if self.broadcast {
            socket.set_broadcast(true)?;
        }
        Ok((socket, target))
    }
}

impl DataSink for UdpSink {
    fn name(&self) -> &str {
        self.cell.name()
    }

    fn state(&self) -> ConnectionState {
        self.cell.get()
    }

    fn ready(&self) -> bool {
        self.socket.is_some() && self.cell.get() == ConnectionState::Connected
    }

    fn start(&mut self) -> Result<()> {
        self.cell.set(ConnectionState::Connecting, None);
        match self.open() {
            Ok((socket, target)) => {
                log::info!("{}: sending to {}", self.cell.name(), target);
                self.socket = Some(socket);
                self.target = Some(target);
                self.cell.set(ConnectionState::Connected, None);
                Ok(())
            }
            Err(e) => {
                self.cell.set(ConnectionState::Error, Some(e.to_string()));
                Err(e)
            }
        }
    }

    fn stop(&mut self) {
        self.socket = None;
        self.target = None;
        self.cell.set(ConnectionState::Disconnected, None);
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let (socket, target) = match (&self.socket, self.target) {
            (Some(socket), Some(target)) => (socket, target),
            _ => return Err(Error::NotReady(self.cell.name().to_string())),
        };

        if let Err(e) = socket.send_to(data, target) {
            self.cell.set(ConnectionState::Error, Some(e.to_string()));
            self.socket = None;
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    #[test]
    fn test_udp_sink_sends_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let (tx, _rx) = unbounded();
        let cell = StateCell::new("udp:test", tx);
        let mut sink = UdpSink::new("127.0.0.1".to_string(), port, false, cell);

        sink.start().unwrap();
        assert!(sink.ready());

        sink.write(b"$GNGLL,4916.45,N,12311.12,W,225444,A*2F\r\n")
            .unwrap();

        let mut buf = [0u8; 256];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"$GNGLL,4916.45,N,12311.12,W,225444,A*2F\r\n");

        sink.stop();
        assert!(!sink.ready());
    }

    #[test]
    fn test_write_before_start_not_ready() {
        let (tx, _rx) = unbounded();
        let cell = StateCell::new("udp:test", tx);
        let mut sink = UdpSink::new("127.0.0.1".to_string(), 10110, false, cell);

        match sink.write(b"x") {
            Err(Error::NotReady(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_unresolvable_host_fails_start() {
        let (tx, _rx) = unbounded();
        let cell = StateCell::new("udp:test", tx);
        let mut sink = UdpSink::new(
            "definitely-not-a-real-host.invalid".to_string(),
            10110,
            false,
            cell,
        );

        assert!(sink.start().is_err());
        assert_eq!(sink.state(), ConnectionState::Error);
    }
}
