//! XMODEM sender.
//!
//! SAM-BA accepts bulk writes over XMODEM after an `S addr,#` command: the
//! monitor switches its UART into receive mode and starts requesting blocks
//! at the given address.
//!
//! ```text
//! Block format:
//! +-----+-----+------+--------------+----------------------+
//! | SOH | SEQ | ~SEQ |  DATA (128)  | CRC16 (2) or SUM (1) |
//! +-----+-----+------+--------------+----------------------+
//! ```
//!
//! The receiver picks the integrity check: `C` asks for CRC16, `NAK` for the
//! 8-bit arithmetic checksum.

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::crc::{checksum8, crc16_xmodem};
use log::{debug, trace};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// XMODEM control characters.
pub mod control {
    /// Start of Header (128-byte block).
    pub const SOH: u8 = 0x01;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge (also requests checksum mode at start).
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// CRC mode request character.
    pub const C: u8 = b'C';
    /// Fill byte for the final short block.
    pub const SUB: u8 = 0x1A;
}

/// Payload size of one block.
pub const BLOCK_SIZE: usize = 128;

/// Integrity check negotiated with the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumMode {
    /// 8-bit arithmetic sum.
    Checksum,
    /// CRC16-XMODEM.
    Crc16,
}

/// XMODEM configuration options.
#[derive(Debug, Clone)]
pub struct XmodemConfig {
    /// How long to wait for a single reply character before counting a retry.
    pub char_timeout: Duration,
    /// How long to wait for the receiver's initial `C`/`NAK`.
    pub start_timeout: Duration,
    /// Maximum retries per block (and for the final EOT).
    pub max_retries: u32,
}

impl Default for XmodemConfig {
    fn default() -> Self {
        Self {
            char_timeout: Duration::from_secs(1),
            start_timeout: Duration::from_secs(10),
            max_retries: 16,
        }
    }
}

/// XMODEM transfer handler.
pub struct XmodemTransfer<'a, P: Port> {
    port: &'a mut P,
    config: XmodemConfig,
}

impl<'a, P: Port> XmodemTransfer<'a, P> {
    /// Create a new XMODEM transfer handler.
    pub fn new(port: &'a mut P) -> Self {
        Self {
            port,
            config: XmodemConfig::default(),
        }
    }

    /// Create a new XMODEM transfer handler with custom configuration.
    pub fn with_config(port: &'a mut P, config: XmodemConfig) -> Self {
        Self { port, config }
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(1) => Ok(buf[0]),
            Ok(_) => Err(Error::Timeout("read_byte: no data".into())),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                Err(Error::Timeout("read_byte: timeout".into()))
            },
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Wait for the receiver to choose a checksum mode.
    pub fn wait_for_start(&mut self) -> Result<ChecksumMode> {
        debug!("Waiting for XMODEM receiver...");
        let start = Instant::now();
        let mut cancels = 0;

        while start.elapsed() < self.config.start_timeout {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            match self.read_byte() {
                Ok(control::C) => {
                    debug!("Receiver requested CRC16 mode");
                    return Ok(ChecksumMode::Crc16);
                },
                Ok(control::NAK) => {
                    debug!("Receiver requested checksum mode");
                    return Ok(ChecksumMode::Checksum);
                },
                Ok(control::CAN) => {
                    cancels += 1;
                    if cancels >= 2 {
                        return Err(Error::Xmodem("Transfer cancelled by receiver".into()));
                    }
                },
                Ok(c) => {
                    trace!("Ignoring 0x{c:02X} while waiting for receiver");
                },
                Err(Error::Timeout(_)) => {},
                Err(e) => return Err(e),
            }
        }

        Err(Error::Xmodem("Receiver never requested a transfer".into()))
    }

    /// Build one block; short data is padded with `SUB`.
    fn build_block(seq: u8, data: &[u8], mode: ChecksumMode) -> Vec<u8> {
        let mut block = Vec::with_capacity(3 + BLOCK_SIZE + 2);

        block.push(control::SOH);
        block.push(seq);
        block.push(!seq);

        block.extend_from_slice(&data[..data.len().min(BLOCK_SIZE)]);
        block.resize(3 + BLOCK_SIZE, control::SUB);

        let payload = &block[3..3 + BLOCK_SIZE];
        match mode {
            ChecksumMode::Crc16 => {
                let crc = crc16_xmodem(payload);
                block.extend_from_slice(&crc.to_be_bytes());
            },
            ChecksumMode::Checksum => {
                let sum = checksum8(payload);
                block.push(sum);
            },
        }

        block
    }

    /// Send a block and wait for ACK.
    fn send_block(&mut self, seq: u8, block: &[u8]) -> Result<()> {
        for retry in 0..self.config.max_retries {
            trace!("Sending block {seq} (attempt {})", retry + 1);

            self.port.write_all(block)?;
            self.port.flush()?;

            match self.read_byte() {
                Ok(control::ACK) => {
                    trace!("Block {seq} ACKed");
                    return Ok(());
                },
                Ok(control::NAK) => {
                    debug!("Block {seq} NAKed, retrying...");
                },
                Ok(control::CAN) => {
                    return Err(Error::Xmodem("Transfer cancelled by receiver".into()));
                },
                Ok(c) => {
                    debug!("Unexpected response 0x{c:02X} to block {seq}, retrying...");
                },
                Err(Error::Timeout(_)) => {
                    debug!("Timeout waiting for ACK of block {seq}, retrying...");
                },
                Err(e) => return Err(e),
            }
        }

        Err(Error::Xmodem(format!(
            "Block {seq} failed after {} retries",
            self.config.max_retries
        )))
    }

    /// Send EOT until the receiver acknowledges it.
    fn send_eot(&mut self) -> Result<()> {
        debug!("Sending EOT");

        for _retry in 0..self.config.max_retries {
            self.port.write_all(&[control::EOT])?;
            self.port.flush()?;

            match self.read_byte() {
                Ok(control::ACK) => {
                    debug!("EOT ACKed");
                    return Ok(());
                },
                Ok(_) | Err(Error::Timeout(_)) => {},
                Err(e) => return Err(e),
            }
        }

        Err(Error::Xmodem("EOT was never acknowledged".into()))
    }

    /// Transfer `data` to the receiver.
    ///
    /// `progress` is called after each acknowledged block with
    /// `(bytes_sent, total)`.
    pub fn send<F>(&mut self, data: &[u8], mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        debug!("Starting XMODEM transfer ({} bytes)", data.len());

        let saved_timeout = self.port.timeout();
        self.port.set_timeout(self.config.char_timeout)?;
        let result = self.send_blocks(data, &mut progress);
        self.port.set_timeout(saved_timeout)?;
        result
    }

    fn send_blocks<F>(&mut self, data: &[u8], progress: &mut F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let mode = self.wait_for_start()?;

        let total = data.len();
        let mut sent = 0;
        let mut seq: u8 = 1;
        for chunk in data.chunks(BLOCK_SIZE) {
            let block = Self::build_block(seq, chunk, mode);
            self.send_block(seq, &block)?;
            seq = seq.wrapping_add(1);

            sent += chunk.len();
            progress(sent, total);
        }

        self.send_eot()?;

        debug!("XMODEM transfer complete");
        Ok(())
    }
}
