//! Scriptable source for hardware-free session testing.

use crossbeam_channel::Sender;
use std::time::SystemTime;

use crate::endpoint::{ConnectionState, DataSource, EndpointEvent, SourceChunk, StateCell};
use crate::error::Result;

/// A source driven entirely by the test: push chunks with
/// [`MockSource::inject`] or through a cloned [`MockSource::chunk_sender`],
/// flip states through the cloned [`MockSource::state_cell`].
pub struct MockSource {
    events: Sender<EndpointEvent>,
    cell: StateCell,
}

impl MockSource {
    pub fn new(events: Sender<EndpointEvent>, cell: StateCell) -> Self {
        MockSource { events, cell }
    }

    pub fn inject(&self, bytes: &[u8]) {
        let _ = self.events.send(EndpointEvent::Data(SourceChunk {
            bytes: bytes.to_vec(),
            received_at: SystemTime::now(),
        }));
    }

    pub fn chunk_sender(&self) -> Sender<EndpointEvent> {
        self.events.clone()
    }

    pub fn state_cell(&self) -> StateCell {
        self.cell.clone()
    }
}

impl DataSource for MockSource {
    fn name(&self) -> &str {
        self.cell.name()
    }

    fn state(&self) -> ConnectionState {
        self.cell.get()
    }

    fn start(&mut self) -> Result<()> {
        self.cell.set(ConnectionState::Connected, None);
        Ok(())
    }

    fn stop(&mut self) {
        self.cell.set(ConnectionState::Disconnected, None);
    }
}
