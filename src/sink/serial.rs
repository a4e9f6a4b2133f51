//! Physical serial port sink.

use serialport::SerialPort;
use std::io::Write;
use std::time::Duration;

use crate::config::ParityConfig;
use crate::endpoint::{ConnectionState, DataSink, StateCell};
use crate::error::{Error, Result};

/// Write timeout per frame; a healthy port drains an NMEA line in well
/// under a millisecond even at 4800 baud... but give slow USB adapters room.
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct SerialSink {
    port_name: String,
    baud: u32,
    data_bits: u8,
    parity: ParityConfig,
    stop_bits: u8,
    cell: StateCell,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialSink {
    pub fn new(
        port_name: String,
        baud: u32,
        data_bits: u8,
        parity: ParityConfig,
        stop_bits: u8,
        cell: StateCell,
    ) -> Self {
        SerialSink {
            port_name,
            baud,
            data_bits,
            parity,
            stop_bits,
            cell,
            port: None,
        }
    }

    fn open_port(&self) -> Result<Box<dyn SerialPort>> {
        let data_bits = match self.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        };
        let parity = match self.parity {
            ParityConfig::None => serialport::Parity::None,
            ParityConfig::Odd => serialport::Parity::Odd,
            ParityConfig::Even => serialport::Parity::Even,
        };
        let stop_bits = match self.stop_bits {
            2 => serialport::StopBits::Two,
            _ => serialport::StopBits::One,
        };

        let port = serialport::new(&self.port_name, self.baud)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(serialport::FlowControl::None)
            .timeout(WRITE_TIMEOUT)
            .open()?;

        log::info!(
            "Opened serial port: {} at {} baud",
            self.port_name,
            self.baud
        );
        Ok(port)
    }
}

impl DataSink for SerialSink {
    fn name(&self) -> &str {
        self.cell.name()
    }

    fn state(&self) -> ConnectionState {
        self.cell.get()
    }

    fn ready(&self) -> bool {
        self.port.is_some() && self.cell.get() == ConnectionState::Connected
    }

    fn start(&mut self) -> Result<()> {
        self.cell.set(ConnectionState::Connecting, None);
        match self.open_port() {
            Ok(port) => {
                self.port = Some(port);
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
        self.port = None;
        self.cell.set(ConnectionState::Disconnected, None);
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| Error::NotReady(self.cell.name().to_string()))?;

        let result = port.write_all(data).and_then(|_| port.flush());
        if let Err(e) = result {
            self.cell.set(ConnectionState::Error, Some(e.to_string()));
            self.port = None;
            return Err(e.into());
        }
        Ok(())
    }
}
