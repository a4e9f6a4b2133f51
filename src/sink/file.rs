//! Append-only file sink.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::endpoint::{ConnectionState, DataSink, StateCell};
use crate::error::{Error, Result};

pub struct FileSink {
    path: PathBuf,
    append_timestamp: bool,
    cell: StateCell,
    file: Option<File>,
    effective_path: Option<PathBuf>,
}

impl FileSink {
    pub fn new(path: PathBuf, append_timestamp: bool, cell: StateCell) -> Self {
        FileSink {
            path,
            append_timestamp,
            cell,
            file: None,
            effective_path: None,
        }
    }

    /// Path actually opened, after timestamp expansion.
    pub fn effective_path(&self) -> Option<&Path> {
        self.effective_path.as_deref()
    }

    fn open(&self) -> Result<(File, PathBuf)> {
        let path = if self.append_timestamp {
            timestamped_path(&self.path)
        } else {
            self.path.clone()
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok((file, path))
    }
}

/// `track.nmea` -> `track_20240131_154500.nmea`, stamped at start time so
/// every session lands in its own file.
fn timestamped_path(path: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("nmea");
    let name = match path.extension().and_then(|s| s.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, stamp, ext),
        None => format!("{}_{}", stem, stamp),
    };
    path.with_file_name(name)
}

impl DataSink for FileSink {
    fn name(&self) -> &str {
        self.cell.name()
    }

    fn state(&self) -> ConnectionState {
        self.cell.get()
    }

    fn ready(&self) -> bool {
        self.file.is_some() && self.cell.get() == ConnectionState::Connected
    }

    fn start(&mut self) -> Result<()> {
        self.cell.set(ConnectionState::Connecting, None);
        match self.open() {
            Ok((file, path)) => {
                log::info!("{}: appending to {}", self.cell.name(), path.display());
                self.file = Some(file);
                self.effective_path = Some(path);
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
        self.file = None;
        self.cell.set(ConnectionState::Disconnected, None);
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::NotReady(self.cell.name().to_string()))?;

        let result = file.write_all(data).and_then(|_| file.flush());
        if let Err(e) = result {
            self.cell.set(ConnectionState::Error, Some(e.to_string()));
            self.file = None;
            return Err(e.into());
        }
        Ok(())
    }
}
