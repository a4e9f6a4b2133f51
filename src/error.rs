//! Error types for the bridge
//!
//! # Error Recovery Strategies
//!
//! Different error types require different recovery approaches:
//!
//! ## Transient Errors (Handled Internally)
//!
//! - **`Io`**: Read/write failure on a socket or file. Sources handle these
//!   through their own reconnect policy (TCP) or by flagging the endpoint
//!   state (UDP); sink write failures are counted and the sink is parked in
//!   the error state without stopping the session.
//!
//! - **`Serial`**: Serial port communication error. Often caused by cable
//!   disconnection or the port being claimed by another process. The
//!   affected sink enters the error state; other sinks keep receiving.
//!
//! ## Configuration Errors (Fix and Restart)
//!
//! - **`Config`**: Configuration value is invalid. Raised synchronously from
//!   session start; fix the configuration and start again.
//! - **`Resolve`**: Hostname could not be resolved to an address.
//!
//! ## Lifecycle Misuse (Caller Bugs)
//!
//! - **`InvalidState`**: Session start while not stopped.
//! - **`NotReady`**: Sink write before start finished or after a fault.

use thiserror::Error;

/// Errors that can occur in the bridge
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Failed to resolve address: {0}")]
    Resolve(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
