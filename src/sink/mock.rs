//! Recording sink for session testing.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::endpoint::{ConnectionState, DataSink, StateCell};
use crate::error::{Error, Result};

/// Captures every write; can be told to fail each write while staying
/// ready, which is how broadcast isolation is exercised.
pub struct MockSink {
    cell: StateCell,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    fail_writes: bool,
}

impl MockSink {
    pub fn new(cell: StateCell) -> Self {
        MockSink {
            cell,
            writes: Arc::new(Mutex::new(Vec::new())),
            fail_writes: false,
        }
    }

    pub fn failing(cell: StateCell) -> Self {
        MockSink {
            cell,
            writes: Arc::new(Mutex::new(Vec::new())),
            fail_writes: true,
        }
    }

    /// Shared handle to the captured writes; clones stay valid after the
    /// sink moves into its worker thread.
    pub fn writes_handle(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.writes)
    }
}

impl DataSink for MockSink {
    fn name(&self) -> &str {
        self.cell.name()
    }

    fn state(&self) -> ConnectionState {
        self.cell.get()
    }

    fn ready(&self) -> bool {
        self.cell.get() == ConnectionState::Connected
    }

    fn start(&mut self) -> Result<()> {
        self.cell.set(ConnectionState::Connected, None);
        Ok(())
    }

    fn stop(&mut self) {
        self.cell.set(ConnectionState::Disconnected, None);
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.cell.get() != ConnectionState::Connected {
            return Err(Error::NotReady(self.cell.name().to_string()));
        }
        if self.fail_writes {
            return Err(Error::Other(format!("{}: injected failure", self.cell.name())));
        }
        self.writes.lock().push(data.to_vec());
        Ok(())
    }
}
