//! Configuration loading from TOML
//!
//! # Configuration File Format
//!
//! The configuration file is TOML-formatted with the following structure:
//!
//! ```toml
//! [session.input]
//! type = "udp"
//! port = 4001
//! # bind_address = "192.168.4.2"   # optional, defaults to all interfaces
//!
//! # or a TCP client input:
//! # type = "tcp"
//! # host = "192.168.4.1"
//! # port = 10110
//! # reconnect_delay_ms = 2000
//!
//! [[session.outputs]]
//! type = "serial"
//! port = "/dev/ttyUSB0"
//! baud = 4800
//!
//! [[session.outputs]]
//! type = "udp"
//! address = "255.255.255.255"
//! port = 10110
//! broadcast = true
//!
//! [[session.outputs]]
//! enabled = false
//! type = "file"
//! path = "/var/log/nmea/track.nmea"
//! append_timestamp = true
//!
//! [session.filter]
//! mode = "allow_list"
//! allowed = ["GGA", "RMC", "GNVTG"]
//!
//! [session.rate_limit]
//! max_hz = 1.0
//! per_type = true
//! ```
//!
//! The same structures double as the programmatic session configuration:
//! embedders build a [`SessionConfig`] value directly and hand it to
//! [`crate::session::Session::start`]. Configuration is immutable for the
//! duration of a session.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

fn default_true() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_baud() -> u32 {
    115200
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

/// Where the bridge reads NMEA bytes from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputConfig {
    /// Listen for UDP datagrams, one receive event per datagram.
    Udp {
        port: u16,
        /// Interface address to bind; all interfaces when absent.
        #[serde(default)]
        bind_address: Option<String>,
    },
    /// Connect out to a TCP endpoint and read the byte stream.
    Tcp {
        host: String,
        port: u16,
        /// Delay between reconnect attempts after a drop.
        #[serde(default = "default_reconnect_delay_ms")]
        reconnect_delay_ms: u64,
    },
}

impl InputConfig {
    /// Short label used for the source's endpoint name and log lines.
    pub fn label(&self) -> String {
        match self {
            InputConfig::Udp { port, .. } => format!("udp:{}", port),
            InputConfig::Tcp { host, port, .. } => format!("tcp:{}:{}", host, port),
        }
    }
}

/// Serial parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParityConfig {
    #[default]
    None,
    Odd,
    Even,
}

/// One output endpoint kind with its transport-specific settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputKind {
    /// Physical serial port.
    Serial {
        port: String,
        #[serde(default = "default_baud")]
        baud: u32,
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        #[serde(default)]
        parity: ParityConfig,
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
    /// Virtual COM port pair (or pipe fallback when no pair exists).
    VirtualCom {
        port: String,
        /// Probe for a real paired port first, fall back to a pipe.
        #[serde(default = "default_true")]
        auto: bool,
    },
    /// One UDP datagram per frame to a fixed destination.
    Udp {
        address: String,
        port: u16,
        #[serde(default)]
        broadcast: bool,
    },
    /// Append frames to a file, one line each.
    File {
        path: String,
        /// Insert `_YYYYMMDD_HHMMSS` before the extension at start time.
        #[serde(default)]
        append_timestamp: bool,
    },
}

impl OutputKind {
    pub fn label(&self) -> String {
        match self {
            OutputKind::Serial { port, .. } => format!("serial:{}", port),
            OutputKind::VirtualCom { port, .. } => format!("vcom:{}", port),
            OutputKind::Udp { address, port, .. } => format!("udp:{}:{}", address, port),
            OutputKind::File { path, .. } => format!("file:{}", path),
        }
    }
}

/// One configured output with its enable flag.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: OutputKind,
}

/// Sentence-type filter policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    AllowAll,
    AllowList,
    BlockList,
}

/// Filter configuration. Identifiers may be full (`GNGGA`) or bare (`GGA`)
/// sentence types.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub mode: FilterMode,
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub blocked: Vec<String>,
}

/// Rate-limiter configuration. `max_hz <= 0` disables limiting.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub max_hz: f64,
    /// Apply the interval per sentence type instead of globally.
    #[serde(default)]
    pub per_type: bool,
}

/// Everything one bridge session needs: one input, N outputs, optional
/// filter and rate limit.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
    #[serde(default)]
    pub filter: Option<FilterConfig>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl SessionConfig {
    /// Validate the configuration. Called by [`Config::load`] and again by
    /// session start so programmatically built configs get the same checks.
    pub fn validate(&self) -> Result<()> {
        if let InputConfig::Tcp { host, .. } = &self.input {
            if host.is_empty() {
                return Err(Error::Config("tcp input requires a host".to_string()));
            }
        }

        if !self.outputs.iter().any(|o| o.enabled) {
            return Err(Error::Config(
                "at least one enabled output is required".to_string(),
            ));
        }

        for output in &self.outputs {
            match &output.kind {
                OutputKind::Serial {
                    port,
                    baud,
                    data_bits,
                    stop_bits,
                    ..
                } => {
                    if port.is_empty() {
                        return Err(Error::Config("serial output requires a port".to_string()));
                    }
                    if *baud == 0 {
                        return Err(Error::Config(format!(
                            "serial output {}: baud rate must be positive",
                            port
                        )));
                    }
                    if !(5..=8).contains(data_bits) {
                        return Err(Error::Config(format!(
                            "serial output {}: data_bits must be 5-8 (got {})",
                            port, data_bits
                        )));
                    }
                    if !(1..=2).contains(stop_bits) {
                        return Err(Error::Config(format!(
                            "serial output {}: stop_bits must be 1 or 2 (got {})",
                            port, stop_bits
                        )));
                    }
                }
                OutputKind::VirtualCom { port, .. } => {
                    if port.is_empty() {
                        return Err(Error::Config(
                            "virtual_com output requires a port name".to_string(),
                        ));
                    }
                }
                OutputKind::Udp { address, .. } => {
                    if address.is_empty() {
                        return Err(Error::Config(
                            "udp output requires a destination address".to_string(),
                        ));
                    }
                }
                OutputKind::File { path, .. } => {
                    if path.is_empty() {
                        return Err(Error::Config("file output requires a path".to_string()));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = basic_toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.session.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Result<Config> {
        let config: Config = basic_toml::from_str(toml)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.session.validate()?;
        Ok(config)
    }

    #[test]
    fn test_full_config_parses() {
        let config = parse(
            r#"
            [session.input]
            type = "udp"
            port = 4001

            [[session.outputs]]
            type = "serial"
            port = "/dev/ttyUSB0"
            baud = 4800

            [[session.outputs]]
            enabled = false
            type = "file"
            path = "track.nmea"
            append_timestamp = true

            [session.filter]
            mode = "allow_list"
            allowed = ["GGA", "RMC"]

            [session.rate_limit]
            max_hz = 1.0
            per_type = true
            "#,
        )
        .unwrap();

        assert!(matches!(
            config.session.input,
            InputConfig::Udp { port: 4001, .. }
        ));
        assert_eq!(config.session.outputs.len(), 2);
        assert!(config.session.outputs[0].enabled);
        assert!(!config.session.outputs[1].enabled);

        let filter = config.session.filter.unwrap();
        assert_eq!(filter.mode, FilterMode::AllowList);
        assert_eq!(filter.allowed, vec!["GGA", "RMC"]);

        let rate = config.session.rate_limit.unwrap();
        assert_eq!(rate.max_hz, 1.0);
        assert!(rate.per_type);
    }

    #[test]
    fn test_tcp_input_defaults() {
        let config = parse(
            r#"
            [session.input]
            type = "tcp"
            host = "192.168.4.1"
            port = 10110

            [[session.outputs]]
            type = "udp"
            address = "127.0.0.1"
            port = 10111
            "#,
        )
        .unwrap();

        match config.session.input {
            InputConfig::Tcp {
                reconnect_delay_ms, ..
            } => assert_eq!(reconnect_delay_ms, 2000),
            other => panic!("unexpected input: {:?}", other),
        }
    }

    #[test]
    fn test_no_enabled_output_rejected() {
        let err = parse(
            r#"
            [session.input]
            type = "udp"
            port = 4001

            [[session.outputs]]
            enabled = false
            type = "file"
            path = "track.nmea"
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_bad_serial_settings_rejected() {
        let err = parse(
            r#"
            [session.input]
            type = "udp"
            port = 4001

            [[session.outputs]]
            type = "serial"
            port = "/dev/ttyUSB0"
            data_bits = 9
            "#,
        )
        .unwrap_err();

        match err {
            Error::Config(msg) => assert!(msg.contains("data_bits")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_output_labels() {
        assert_eq!(
            OutputKind::Udp {
                address: "10.0.0.1".to_string(),
                port: 10110,
                broadcast: false
            }
            .label(),
            "udp:10.0.0.1:10110"
        );
        assert_eq!(
            InputConfig::Udp {
                port: 4001,
                bind_address: None
            }
            .label(),
            "udp:4001"
        );
    }
}
