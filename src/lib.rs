//! gnss-bridge - NMEA-0183 data bridge
//!
//! Ingests a GNSS receiver's sentence stream over UDP or TCP, validates
//! framing and checksums, applies type filtering and rate limiting, and
//! fans surviving sentences out to serial ports, virtual COM ports, UDP
//! destinations and log files. Frames are re-emitted byte-exact, so
//! downstream navigation software sees the receiver's own output.
//!
//! The [`session::Session`] is the entry point: build a
//! [`config::SessionConfig`] (or load one from TOML via
//! [`config::Config::load`]), start the session, watch its events, stop it.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod nmea;
pub mod pipeline;
pub mod session;
pub mod sink;
pub mod source;

pub use config::{Config, SessionConfig};
pub use error::{Error, Result};
pub use session::{Session, SessionEvent, SessionState, StatsSnapshot};
