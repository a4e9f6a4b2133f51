//! Virtual COM port sink.
//!
//! Two backends hide behind [`VirtualComProvider`]:
//!
//! - **Paired port**: the named port exists on the host (created by a
//!   com0com/socat-style pair); we open our half like any serial port and
//!   the consumer application opens the other half.
//! - **Pipe fallback**: no such port exists, so we listen on a local
//!   socket instead. Writes are silently dropped until a client connects,
//!   and a client disconnect just returns the provider to waiting.
//!
//! Auto mode probes `serialport::available_ports()` once at construction;
//! the core never revisits the choice mid-session.

use crate::endpoint::{ConnectionState, DataSink, StateCell};
use crate::error::{Error, Result};

/// Virtual COM pairs run at a fixed fast rate; the consumer side does not
/// care because no physical line exists.
const VCOM_BAUD: u32 = 115200;

/// Backend behind the virtual COM sink.
pub trait VirtualComProvider: Send {
    /// Human-readable backend description for logs.
    fn description(&self) -> String;

    fn open(&mut self) -> Result<()>;

    fn close(&mut self);

    /// Write one frame. Providers may drop the frame silently when no
    /// consumer is attached; that is not an error.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    fn is_ready(&self) -> bool;
}

/// Pick the backend for `port_name`. With `auto` set, a present serial
/// port wins; otherwise (or on non-Unix hosts) the paired port is assumed.
pub fn create_provider(port_name: &str, auto: bool) -> Box<dyn VirtualComProvider> {
    if auto && !port_present(port_name) {
        #[cfg(unix)]
        {
            log::info!(
                "virtual port {} not present, using pipe fallback",
                port_name
            );
            return Box::new(pipe::PipeProvider::new(port_name));
        }
    }
    Box::new(PairedPortProvider::new(port_name))
}

fn port_present(name: &str) -> bool {
    serialport::available_ports()
        .map(|ports| ports.iter().any(|p| p.port_name == name))
        .unwrap_or(false)
}

/// One half of an existing virtual serial pair.
pub struct PairedPortProvider {
    port_name: String,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl PairedPortProvider {
    pub fn new(port_name: &str) -> Self {
        PairedPortProvider {
            port_name: port_name.to_string(),
            port: None,
        }
    }
}

impl VirtualComProvider for PairedPortProvider {
    fn description(&self) -> String {
        format!("paired port {}", self.port_name)
    }

    fn open(&mut self) -> Result<()> {
        let port = serialport::new(&self.port_name, VCOM_BAUD)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(std::time::Duration::from_secs(1))
            .open()?;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        use std::io::Write;

        let port = self
            .port
            .as_mut()
            .ok_or_else(|| Error::NotReady(self.port_name.clone()))?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.port.is_some()
    }
}

#[cfg(unix)]
mod pipe {
    use std::io::Write;
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::PathBuf;

    use super::VirtualComProvider;
    use crate::error::{Error, Result};

    /// Local-socket stand-in for a virtual serial pair. The consumer
    /// connects to the socket path instead of opening a port.
    pub struct PipeProvider {
        path: PathBuf,
        listener: Option<UnixListener>,
        client: Option<UnixStream>,
    }

    impl PipeProvider {
        pub fn new(port_name: &str) -> Self {
            // A path-like name is used as-is, a bare COM-style name lands
            // in the temp directory.
            let path = if port_name.contains('/') {
                PathBuf::from(port_name)
            } else {
                std::env::temp_dir().join(format!("gnss-bridge-{}.sock", port_name))
            };
            PipeProvider {
                path,
                listener: None,
                client: None,
            }
        }

        pub fn socket_path(&self) -> &std::path::Path {
            &self.path
        }

        fn try_accept(&mut self) {
            let Some(listener) = &self.listener else {
                return;
            };
            match listener.accept() {
                Ok((stream, _)) => {
                    log::info!("pipe {}: client connected", self.path.display());
                    if let Err(e) = stream.set_nonblocking(false) {
                        log::warn!("pipe {}: {}", self.path.display(), e);
                    }
                    self.client = Some(stream);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    log::warn!("pipe {}: accept failed: {}", self.path.display(), e);
                }
            }
        }
    }

    impl VirtualComProvider for PipeProvider {
        fn description(&self) -> String {
            format!("pipe {}", self.path.display())
        }

        fn open(&mut self) -> Result<()> {
            let _ = std::fs::remove_file(&self.path);
            let listener = UnixListener::bind(&self.path)
                .map_err(|e| Error::Config(format!("pipe {}: {}", self.path.display(), e)))?;
            listener.set_nonblocking(true)?;
            self.listener = Some(listener);
            Ok(())
        }

        fn close(&mut self) {
            self.client = None;
            self.listener = None;
            let _ = std::fs::remove_file(&self.path);
        }

        fn write(&mut self, data: &[u8]) -> Result<()> {
            if self.listener.is_none() {
                return Err(Error::NotReady(self.path.display().to_string()));
            }
            if self.client.is_none() {
                self.try_accept();
            }

            // No consumer yet: the frame is dropped on purpose.
            let Some(client) = self.client.as_mut() else {
                return Ok(());
            };

            if let Err(e) = client.write_all(data).and_then(|_| client.flush()) {
                log::info!(
                    "pipe {}: client disconnected ({}), waiting for next",
                    self.path.display(),
                    e
                );
                self.client = None;
            }
            Ok(())
        }

        fn is_ready(&self) -> bool {
            self.listener.is_some()
        }
    }

    impl Drop for PipeProvider {
        fn drop(&mut self) {
            self.close();
        }
    }
}

#[cfg(unix)]
pub use pipe::PipeProvider;

/// Sink facade over the chosen provider.
pub struct VirtualComSink {
    provider: Box<dyn VirtualComProvider>,
    cell: StateCell,
}

impl VirtualComSink {
    pub fn new(port_name: String, auto: bool, cell: StateCell) -> Self {
        VirtualComSink {
            provider: create_provider(&port_name, auto),
            cell,
        }
    }

    /// Build a sink over an explicit provider (used by tests).
    pub fn with_provider(provider: Box<dyn VirtualComProvider>, cell: StateCell) -> Self {
        VirtualComSink { provider, cell }
    }
}

impl DataSink for VirtualComSink {
    fn name(&self) -> &str {
        self.cell.name()
    }

    fn state(&self) -> ConnectionState {
        self.cell.get()
    }

    fn ready(&self) -> bool {
        self.provider.is_ready() && self.cell.get() == ConnectionState::Connected
    }

    fn start(&mut self) -> Result<()> {
        self.cell.set(ConnectionState::Connecting, None);
        match self.provider.open() {
            Ok(()) => {
                log::info!("{}: using {}", self.cell.name(), self.provider.description());
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
        self.provider.close();
        self.cell.set(ConnectionState::Disconnected, None);
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.cell.get() != ConnectionState::Connected {
            return Err(Error::NotReady(self.cell.name().to_string()));
        }
        if let Err(e) = self.provider.write(data) {
            self.cell.set(ConnectionState::Error, Some(e.to_string()));
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::io::Read;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    fn pipe_sink(name: &str) -> (VirtualComSink, std::path::PathBuf) {
        let provider = PipeProvider::new(name);
        let path = provider.socket_path().to_path_buf();
        let (tx, _rx) = unbounded();
        let cell = StateCell::new(format!("vcom:{}", name), tx);
        (VirtualComSink::with_provider(Box::new(provider), cell), path)
    }

    #[test]
    fn test_pipe_drops_writes_until_client_connects() {
        let (mut sink, path) = pipe_sink(&format!("t1-{}", std::process::id()));
        sink.start().unwrap();
        assert!(sink.ready());

        // No client: accepted silently.
        sink.write(b"$GNGLL,dropped*00\r\n").unwrap();

        let mut client = UnixStream::connect(&path).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        // Give the listener a beat so the connection is queued.
        std::thread::sleep(Duration::from_millis(50));

        sink.write(b"$GNGLL,4916.45,N,12311.12,W,225444,A*2F\r\n")
            .unwrap();

        let mut buf = [0u8; 256];
        let n = client.read(&mut buf).unwrap();
        assert!(buf[..n].starts_with(b"$GNGLL,4916.45"));

        sink.stop();
        assert!(!path.exists());
    }

    #[test]
    fn test_pipe_survives_client_disconnect() {
        let (mut sink, path) = pipe_sink(&format!("t2-{}", std::process::id()));
        sink.start().unwrap();

        {
            let client = UnixStream::connect(&path).unwrap();
            std::thread::sleep(Duration::from_millis(50));
            sink.write(b"$GNGLL,first*00\r\n").unwrap();
            drop(client);
        }
        std::thread::sleep(Duration::from_millis(50));

        // First write after the drop notices the dead client, second one
        // goes back to waiting; neither is an error.
        sink.write(b"$GNGLL,second*00\r\n").unwrap();
        sink.write(b"$GNGLL,third*00\r\n").unwrap();
        assert!(sink.ready());

        sink.stop();
    }

    #[test]
    fn test_write_before_start_not_ready() {
        let (mut sink, _path) = pipe_sink(&format!("t3-{}", std::process::id()));
        match sink.write(b"x") {
            Err(Error::NotReady(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
