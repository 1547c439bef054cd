//! Error types for samflash.

use std::io;
use thiserror::Error;

/// Result type for samflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for samflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The serial port could not be opened. Not recoverable at this layer.
    #[error("Unable to open serial port {port}: {reason}")]
    PortOpen {
        /// Port name/path that failed to open.
        port: String,
        /// Underlying failure description.
        reason: String,
    },

    /// The monitor did not answer the connection handshake.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Auto-baud probing never produced the monitor prompt.
    #[error("Auto-baud failed to synchronize after {attempts} attempts")]
    AutoBaud {
        /// Number of probes sent.
        attempts: u32,
    },

    /// A response did not have the expected terminator or shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// XMODEM transfer error.
    #[error("XMODEM error: {0}")]
    Xmodem(String),

    /// A chip identity bitfield had no entry in its lookup table.
    #[error("Cannot decode {field}: no table entry for code {code:#04x}")]
    Decode {
        /// Name of the bitfield.
        field: &'static str,
        /// Raw code extracted from the register.
        code: u32,
    },

    /// The flash controller never reported ready.
    #[error("Flash controller not responding after {waited_ms} ms")]
    DeviceNotResponding {
        /// Time spent polling, in milliseconds.
        waited_ms: u128,
    },

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A primitive was issued before the session completed its handshake.
    #[error("SAM-BA session is not connected")]
    NotReady,

    /// The embedding application requested cancellation.
    #[error("Operation interrupted")]
    Interrupted,

    /// No device profile with this name.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// No serial port matched the discovery criteria.
    #[error("No serial port found")]
    PortNotFound,

    /// Unsupported operation for the selected device.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error came from the link itself rather than the device.
    pub fn is_link_error(&self) -> bool {
        match self {
            Self::Io(_) | Self::PortOpen { .. } => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }

    /// Whether a higher layer may reasonably reconnect and retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::AutoBaud { .. } | Self::Protocol(_) | Self::Timeout(_)
        )
    }
}
