//! SAM-BA monitor command protocol.
//!
//! The ROM monitor accepts short ASCII commands terminated by `#` and ends
//! every answer with the `>` prompt:
//!
//! ```text
//! W<addr>,<data>#   write word        w<addr>,#   read word
//! H<addr>,<data>#   write half-word   h<addr>,#   read half-word
//! O<addr>,<data>#   write byte        o<addr>,#   read byte
//! S<addr>,#         receive XMODEM    V#          version
//! ```
//!
//! Addresses are 8 hex digits. Word contents are the numeric value of the
//! little-endian word in target memory, so they read byte-reversed compared
//! to the memory image.
//!
//! ## Session lifecycle
//!
//! ```text
//! Closed -> Opening -> (AutoBaud) -> Handshaking -> Ready -> Closed
//! ```
//!
//! A session owns its port exclusively; every primitive flushes both
//! directions before writing so stale bytes from an earlier timed-out
//! exchange cannot be mistaken for the new response.

use crate::error::{Error, Result};
use crate::port::Port;
use log::{debug, info, trace, warn};
use std::thread;
use std::time::{Duration, Instant};

/// Response terminator.
pub const PROMPT: u8 = b'>';

/// Auto-baud probe sequence.
pub const AUTOBAUD_PROBE: [u8; 3] = [0x80, 0x80, b'#'];

/// Version query.
pub const VERSION_COMMAND: &str = "V#";

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Link released.
    Closed,
    /// Link acquired, nothing exchanged yet.
    Opening,
    /// Probing for the monitor's baud rate.
    AutoBaud,
    /// Reading the banner and querying the version.
    Handshaking,
    /// Accepting primitive operations.
    Ready,
}

/// Session timing and safety limits.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on the time spent collecting one response.
    pub response_timeout: Duration,
    /// Responses longer than this without a prompt are a protocol error.
    pub max_response_len: usize,
    /// Number of auto-baud probes before giving up.
    pub autobaud_attempts: u32,
    /// Pause after each auto-baud probe.
    pub autobaud_delay: Duration,
    /// Bytes of start-up banner discarded during the handshake.
    pub banner_len: usize,
    /// Hardware settle time before the version query.
    pub settle_delay: Duration,
    /// Pause between writing a command and reading its response.
    pub command_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(5),
            max_response_len: 512,
            autobaud_attempts: 200,
            autobaud_delay: Duration::from_millis(1),
            banner_len: 22,
            settle_delay: Duration::from_secs(1),
            command_delay: Duration::from_millis(10),
        }
    }
}

impl SessionConfig {
    /// Configuration without any fixed sleeps, for fast links and tests.
    #[must_use]
    pub fn without_delays(mut self) -> Self {
        self.autobaud_delay = Duration::ZERO;
        self.settle_delay = Duration::ZERO;
        self.command_delay = Duration::ZERO;
        self
    }

    /// Set the auto-baud attempt budget.
    #[must_use]
    pub fn with_autobaud_attempts(mut self, attempts: u32) -> Self {
        self.autobaud_attempts = attempts;
        self
    }

    /// Set the maximum accepted response length.
    #[must_use]
    pub fn with_max_response_len(mut self, len: usize) -> Self {
        self.max_response_len = len;
        self
    }
}

/// Parse the numeric value out of a read response such as `"\n\r0x0000CAFE\n\r"`.
pub fn parse_value(response: &str) -> Result<u32> {
    let text = response.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .ok_or_else(|| Error::Protocol(format!("unexpected read response {text:?}")))?;
    u32::from_str_radix(digits, 16)
        .map_err(|_| Error::Protocol(format!("unexpected read response {text:?}")))
}

/// One SAM-BA connection.
pub struct SamBaSession<P: Port> {
    port: P,
    config: SessionConfig,
    state: SessionState,
    version: Option<String>,
}

impl<P: Port> SamBaSession<P> {
    /// Wrap an already opened port.
    pub fn new(port: P) -> Self {
        Self::with_config(port, SessionConfig::default())
    }

    /// Wrap an already opened port with custom limits.
    pub fn with_config(port: P, config: SessionConfig) -> Self {
        Self {
            port,
            config,
            state: SessionState::Opening,
            version: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Monitor version string reported during the last handshake.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Session limits.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    ///
    /// Used for byte-level sub-protocols (XMODEM) that bypass the command
    /// framing.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the session and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Synchronize with the monitor and query its version.
    ///
    /// May be called again on a ready session to re-establish the link,
    /// e.g. before verifying what was just written.
    pub fn connect(&mut self, autobaud: bool) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(Error::NotReady);
        }
        debug!(
            "Connecting to SAM-BA on {} at {} baud",
            self.port.name(),
            self.port.baud_rate()
        );

        let result = self.handshake(autobaud);
        match &result {
            Ok(()) => self.state = SessionState::Ready,
            Err(_) => self.state = SessionState::Opening,
        }
        result
    }

    fn handshake(&mut self, autobaud: bool) -> Result<()> {
        if autobaud {
            self.state = SessionState::AutoBaud;
            self.auto_baud()?;
        }

        self.state = SessionState::Handshaking;
        self.port.clear_buffers()?;
        let banner = self.port.read_up_to(self.config.banner_len)?;
        trace!("Discarded banner: {banner:02X?}");
        thread::sleep(self.config.settle_delay);

        self.send_raw(VERSION_COMMAND)?;
        thread::sleep(self.config.command_delay);
        let response = match self.retrieve_response() {
            Ok(response) => response,
            Err(Error::Timeout(_)) => {
                return Err(Error::Connection(format!(
                    "SAM-BA did not respond to {VERSION_COMMAND}"
                )));
            },
            Err(e) => return Err(e),
        };

        let version = response.trim();
        if version.is_empty() {
            return Err(Error::Connection(format!(
                "SAM-BA sent an empty answer to {VERSION_COMMAND}"
            )));
        }
        info!("SAM-BA version: {version}");
        self.version = Some(version.to_string());
        Ok(())
    }

    fn auto_baud(&mut self) -> Result<()> {
        info!("Attempting auto-baud with SAM-BA");
        for attempt in 1..=self.config.autobaud_attempts {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            self.port.write_all_bytes(&AUTOBAUD_PROBE)?;
            thread::sleep(self.config.autobaud_delay);
            if self.port.read_byte()? == Some(PROMPT) {
                info!("SAM-BA auto-baud successful after {attempt} probe(s)");
                return Ok(());
            }
            trace!("Auto-baud probe {attempt} unanswered");
        }
        warn!(
            "No auto-baud answer after {} probes",
            self.config.autobaud_attempts
        );
        Err(Error::AutoBaud {
            attempts: self.config.autobaud_attempts,
        })
    }

    /// Release the link. Further primitives fail with [`Error::NotReady`].
    pub fn close(&mut self) -> Result<()> {
        if self.state != SessionState::Closed {
            self.state = SessionState::Closed;
            self.port.close()?;
        }
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state == SessionState::Ready {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    fn send_raw(&mut self, message: &str) -> Result<()> {
        self.port.clear_buffers()?;
        debug!("Writing to device: {message:?}");
        self.port.write_all_bytes(message.as_bytes())
    }

    fn transact(&mut self, message: &str) -> Result<String> {
        self.ensure_ready()?;
        self.send_raw(message)?;
        self.retrieve_response()
    }

    /// Read until the `>` prompt.
    ///
    /// A link that stays silent yields [`Error::Timeout`]; a response that
    /// starts but never terminates, or grows past the configured maximum,
    /// yields [`Error::Protocol`].
    pub fn retrieve_response(&mut self) -> Result<String> {
        let start = Instant::now();
        let mut data = Vec::new();

        loop {
            match self.port.read_byte()? {
                Some(PROMPT) => break,
                Some(byte) => {
                    data.push(byte);
                    if data.len() > self.config.max_response_len {
                        return Err(Error::Protocol(format!(
                            "response exceeded {} bytes without a prompt",
                            self.config.max_response_len
                        )));
                    }
                },
                None if data.is_empty() => {
                    return Err(Error::Timeout("no response from SAM-BA".into()));
                },
                None => {
                    return Err(Error::Protocol(format!(
                        "unterminated response {:?}",
                        String::from_utf8_lossy(&data)
                    )));
                },
            }
            if start.elapsed() > self.config.response_timeout {
                return Err(Error::Protocol(format!(
                    "response not terminated within {} ms",
                    self.config.response_timeout.as_millis()
                )));
            }
        }

        let response = String::from_utf8_lossy(&data).into_owned();
        debug!("Got response: {:?}", response.trim());
        Ok(response)
    }

    /// Write one byte at `address`.
    pub fn write_byte(&mut self, address: u32, contents: u8) -> Result<String> {
        debug!("Writing byte at {address:08X}: {contents:02X}");
        self.transact(&format!("O{address:08X},{contents:02X}#"))
    }

    /// Write a half-word at `address`.
    pub fn write_hword(&mut self, address: u32, contents: u16) -> Result<String> {
        debug!("Writing half word at {address:08X}: {contents:04X}");
        self.transact(&format!("H{address:08X},{contents:04X}#"))
    }

    /// Write a word at `address`.
    pub fn write_word(&mut self, address: u32, contents: u32) -> Result<String> {
        debug!("Writing word at {address:08X}: {contents:08X}");
        self.transact(&format!("W{address:08X},{contents:08X}#"))
    }

    /// Read one byte; returns the raw response text.
    pub fn read_byte(&mut self, address: u32) -> Result<String> {
        self.transact(&format!("o{address:08X},#"))
    }

    /// Read a half-word; returns the raw response text.
    pub fn read_hword(&mut self, address: u32) -> Result<String> {
        self.transact(&format!("h{address:08X},#"))
    }

    /// Read a word; returns the raw response text.
    pub fn read_word(&mut self, address: u32) -> Result<String> {
        self.transact(&format!("w{address:08X},#"))
    }

    /// Read one byte and parse it.
    pub fn read_byte_value(&mut self, address: u32) -> Result<u8> {
        let response = self.read_byte(address)?;
        u8::try_from(parse_value(&response)?)
            .map_err(|_| Error::Protocol(format!("byte read returned {:?}", response.trim())))
    }

    /// Read a half-word and parse it.
    pub fn read_hword_value(&mut self, address: u32) -> Result<u16> {
        let response = self.read_hword(address)?;
        u16::try_from(parse_value(&response)?)
            .map_err(|_| Error::Protocol(format!("half-word read returned {:?}", response.trim())))
    }

    /// Read a word and parse it.
    pub fn read_word_value(&mut self, address: u32) -> Result<u32> {
        let response = self.read_word(address)?;
        parse_value(&response)
    }

    /// Tell the monitor to expect an XMODEM upload to `address`.
    ///
    /// Only sends the command; the transfer itself is run by the caller on
    /// [`port_mut`](Self::port_mut).
    pub fn xm_init_send(&mut self, address: u32) -> Result<()> {
        self.ensure_ready()?;
        let message = format!("S{address:08X},#");
        debug!("Starting send file with command: {message}");
        self.send_raw(&message)
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{SamBaSession, SessionConfig};
    use crate::error::Result;
    use crate::port::{NativePort, SerialConfig};

    impl SamBaSession<NativePort> {
        /// Open a serial port and wrap it in a session.
        ///
        /// Fails with [`crate::Error::PortOpen`] when the port cannot be
        /// opened; callers should treat that as fatal.
        pub fn open(serial: &SerialConfig, config: SessionConfig) -> Result<Self> {
            let port = NativePort::open(serial)?;
            Ok(Self::with_config(port, config))
        }
    }
}
