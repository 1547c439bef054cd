//! Byte-level serial link abstraction.
//!
//! The SAM-BA monitor speaks 8N1 ASCII over a plain UART, so the link only
//! needs raw reads and writes with a timeout plus the ability to discard
//! whatever is sitting in either direction of the driver buffers.
//!
//! ```text
//! +-----------------------+
//! |   SamBaSession        |  text commands, '>' delimited responses
//! |   XmodemTransfer      |  128-byte blocks after `S addr,#`
//! +-----------+-----------+
//!             |
//!             v
//! +-----------+-----------+
//! |      Port trait       |
//! +-----------+-----------+
//!             |
//!             v
//! +-----------+-----------+
//! | NativePort (serialport)|
//! +-----------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use samflash::port::Port;
//!
//! fn banner<P: Port>(port: &mut P) -> samflash::Result<Vec<u8>> {
//!     port.clear_buffers()?;
//!     port.write_all_bytes(b"V#")?;
//!     port.read_up_to(64)
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Per-read timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_secs(1),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Raw transport the SAM-BA session runs over.
///
/// Reads never block longer than the configured timeout; a timed-out read
/// surfaces either as `Ok(0)` or as an `ErrorKind::TimedOut` I/O error, and
/// callers treat both the same way. No retries happen at this layer.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Set the baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Discard bytes received but not yet read.
    fn clear_input(&mut self) -> Result<()>;

    /// Discard bytes written but not yet transmitted.
    fn clear_output(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Clear input and output buffers.
    fn clear_buffers(&mut self) -> Result<()> {
        self.clear_input()?;
        self.clear_output()
    }

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        Write::write_all(self, buf)?;
        Write::flush(self)?;
        Ok(())
    }

    /// Read a single byte, `None` on timeout.
    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.read(&mut buf) {
            Ok(1) => Ok(Some(buf[0])),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read up to `n` bytes, returning fewer if the link times out first.
    fn read_up_to(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            match self.read(&mut out[filled..]) {
                Ok(0) => break,
                Ok(count) => filled += count,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(e.into()),
            }
        }
        out.truncate(filled);
        Ok(out)
    }
}

impl<P: Port + ?Sized> Port for Box<P> {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        (**self).set_baud_rate(baud_rate)
    }

    fn baud_rate(&self) -> u32 {
        (**self).baud_rate()
    }

    fn clear_input(&mut self) -> Result<()> {
        (**self).clear_input()
    }

    fn clear_output(&mut self) -> Result<()> {
        (**self).clear_output()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

#[cfg(feature = "native")]
pub use native::NativePort;
