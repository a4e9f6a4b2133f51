//! Data sources: where NMEA bytes come from.

mod mock;
mod tcp;
mod udp;

pub use mock::MockSource;
pub use tcp::TcpClientSource;
pub use udp::UdpSource;

use crossbeam_channel::Sender;

use crate::config::InputConfig;
use crate::endpoint::{DataSource, EndpointEvent, StateCell};
use crate::error::Result;

/// Build the source described by `config`, publishing on `events` and
/// reporting state through `cell`.
pub fn create_source(
    config: &InputConfig,
    events: Sender<EndpointEvent>,
    cell: StateCell,
) -> Result<Box<dyn DataSource>> {
    match config {
        InputConfig::Udp { port, bind_address } => Ok(Box::new(UdpSource::new(
            *port,
            bind_address.clone(),
            events,
            cell,
        ))),
        InputConfig::Tcp {
            host,
            port,
            reconnect_delay_ms,
        } => Ok(Box::new(TcpClientSource::new(
            host.clone(),
            *port,
            std::time::Duration::from_millis(*reconnect_delay_ms),
            events,
            cell,
        ))),
    }
}
