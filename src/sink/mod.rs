//! Data sinks: where framed NMEA lines go.

mod file;
mod mock;
mod serial;
mod udp;
pub mod vcom;

pub use file::FileSink;
pub use mock::MockSink;
pub use serial::SerialSink;
pub use udp::UdpSink;
pub use vcom::VirtualComSink;

use crate::config::{OutputConfig, OutputKind};
use crate::endpoint::{DataSink, StateCell};
use crate::error::Result;

/// Build the sink described by `config`, reporting state through `cell`.
pub fn create_sink(config: &OutputConfig, cell: StateCell) -> Result<Box<dyn DataSink>> {
    match &config.kind {
        OutputKind::Serial {
            port,
            baud,
            data_bits,
            parity,
            stop_bits,
        } => Ok(Box::new(SerialSink::new(
            port.clone(),
            *baud,
            *data_bits,
            *parity,
            *stop_bits,
            cell,
        ))),
        OutputKind::VirtualCom { port, auto } => {
            Ok(Box::new(VirtualComSink::new(port.clone(), *auto, cell)))
        }
        OutputKind::Udp {
            address,
            port,
            broadcast,
        } => Ok(Box::new(UdpSink::new(
            address.clone(),
            *port,
            *broadcast,
            cell,
        ))),
        OutputKind::File {
            path,
            append_timestamp,
        } => Ok(Box::new(FileSink::new(
            path.clone().into(),
            *append_timestamp,
            cell,
        ))),
    }
}
