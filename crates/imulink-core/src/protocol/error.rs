//! Protocol errors

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while talking to the sensor
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Not connected to sensor")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Session already running")]
    AlreadyRunning,

    #[error("Command payload is empty")]
    PayloadEmpty,

    #[error("Command payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Handshake failed at {step}: {reason}")]
    HandshakeFailed { step: &'static str, reason: String },

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Transient framing errors.
///
/// These are logged and counted by the codec; they never surface as a
/// failure to the caller and the parser resynchronizes on the next BEGIN.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("broadcast address {0:#04x} is not a valid source address")]
    BroadcastSource(u8),

    #[error("invalid data length {0}")]
    InvalidLength(u8),

    #[error("checksum mismatch: computed {computed:#04x}, received {received:#04x}")]
    ChecksumMismatch { computed: u8, received: u8 },

    #[error("bad end byte: expected 0x4d, got {0:#04x}")]
    BadEnd(u8),
}
