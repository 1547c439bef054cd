//! Enhanced Embedded Flash Controller (EFC) commands.
//!
//! Every command is a single word written to the FCR:
//!
//! ```text
//!  31      24 23              8 7        0
//! +----------+-----------------+----------+
//! | KEY 0x5A |  ARG (page/bit) |  OPCODE  |
//! +----------+-----------------+----------+
//! ```
//!
//! Bit 0 of the FSR reads 1 when the controller is ready for the next
//! command.

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::samba::SamBaSession;
use crate::target::profile::{DeviceProfile, BOOT_BITS, EFC_KEY};
use log::{debug, info, trace};
use std::thread;
use std::time::{Duration, Instant};

/// FSR ready flag.
pub const FSR_READY: u32 = 1 << 0;

/// Build the word written to the FCR.
pub fn command_word(opcode: u8, arg: u16) -> u32 {
    (u32::from(EFC_KEY) << 24) | (u32::from(arg) << 8) | u32::from(opcode)
}

/// EFC polling limits.
#[derive(Debug, Clone)]
pub struct EfcConfig {
    /// Pause between status reads.
    pub poll_interval: Duration,
    /// Give up waiting for ready after this long.
    pub ready_timeout: Duration,
}

impl Default for EfcConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            ready_timeout: Duration::from_secs(10),
        }
    }
}

/// Issues EFC commands for one device profile through a session.
///
/// Holds no link state of its own; every operation borrows the session for
/// its duration.
#[derive(Debug, Clone)]
pub struct EfcController<'a> {
    profile: &'a DeviceProfile,
    config: EfcConfig,
}

impl<'a> EfcController<'a> {
    /// Controller with default polling limits.
    pub fn new(profile: &'a DeviceProfile) -> Self {
        Self::with_config(profile, EfcConfig::default())
    }

    /// Controller with explicit polling limits.
    pub fn with_config(profile: &'a DeviceProfile, config: EfcConfig) -> Self {
        Self { profile, config }
    }

    /// Profile the controller drives.
    pub fn profile(&self) -> &DeviceProfile {
        self.profile
    }

    /// Read FSR once.
    pub fn is_ready<P: Port>(&self, session: &mut SamBaSession<P>) -> Result<bool> {
        let status = session.read_word_value(self.profile.efc_status_register)?;
        trace!("EFC status: 0x{status:08X}");
        Ok(status & FSR_READY != 0)
    }

    /// Poll FSR until the controller reports ready.
    pub fn wait_ready<P: Port>(&self, session: &mut SamBaSession<P>) -> Result<()> {
        let start = Instant::now();
        loop {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            if self.is_ready(session)? {
                return Ok(());
            }
            if start.elapsed() >= self.config.ready_timeout {
                return Err(Error::DeviceNotResponding {
                    waited_ms: start.elapsed().as_millis(),
                });
            }
            debug!("Waiting for EFC");
            thread::sleep(self.config.poll_interval);
        }
    }

    /// Write a raw command word to the FCR without waiting.
    pub fn command<P: Port>(
        &self,
        session: &mut SamBaSession<P>,
        opcode: u8,
        arg: u16,
    ) -> Result<()> {
        let word = command_word(opcode, arg);
        debug!("EFC command 0x{word:08X}");
        session.write_word(self.profile.efc_command_register, word)?;
        Ok(())
    }

    /// Commit the page buffer to flash page `page`.
    ///
    /// Does not wait for completion; the page loop waits before the next
    /// page instead.
    pub fn write_page_trigger<P: Port>(
        &self,
        session: &mut SamBaSession<P>,
        page: u32,
    ) -> Result<()> {
        let arg = u16::try_from(page).map_err(|_| {
            Error::Unsupported(format!("page number {page} does not fit the EFC argument"))
        })?;
        self.command(session, self.profile.write_page_command, arg)
    }

    /// Erase the whole flash.
    pub fn erase_all<P: Port>(&self, session: &mut SamBaSession<P>) -> Result<()> {
        let opcode = self.profile.erase_all_command.ok_or_else(|| {
            Error::Unsupported(format!("{} has no erase-all command", self.profile.name))
        })?;
        info!("Erasing flash");
        self.wait_ready(session)?;
        self.command(session, opcode, 0)?;
        self.wait_ready(session)
    }

    fn gpnvm_command<P: Port>(
        &self,
        session: &mut SamBaSession<P>,
        opcode: u8,
        bit: u8,
    ) -> Result<()> {
        self.wait_ready(session)?;
        self.command(session, opcode, u16::from(bit))?;
        self.wait_ready(session)
    }

    /// Set GPNVM bit `bit`.
    pub fn set_gpnvm<P: Port>(&self, session: &mut SamBaSession<P>, bit: u8) -> Result<()> {
        debug!("Setting GPNVM{bit}");
        self.gpnvm_command(session, self.profile.set_gpnvm_command, bit)
    }

    /// Clear GPNVM bit `bit`.
    pub fn clear_gpnvm<P: Port>(&self, session: &mut SamBaSession<P>, bit: u8) -> Result<()> {
        debug!("Clearing GPNVM{bit}");
        self.gpnvm_command(session, self.profile.clear_gpnvm_command, bit)
    }

    /// Drive GPNVM bits 0..3 to the profile's boot configuration, in bit order.
    pub fn apply_boot_configuration<P: Port>(&self, session: &mut SamBaSession<P>) -> Result<()> {
        info!("Setting boot configuration for {}", self.profile.name);
        for (bit, &value) in self.profile.boot_bits.iter().enumerate().take(BOOT_BITS) {
            let bit = bit as u8;
            if value {
                self.set_gpnvm(session, bit)?;
            } else {
                self.clear_gpnvm(session, bit)?;
            }
        }
        Ok(())
    }

    fn result_register(&self) -> Result<u32> {
        self.profile.efc_result_register.ok_or_else(|| {
            Error::Unsupported(format!("{} has no EFC result register", self.profile.name))
        })
    }

    /// Read the next word the EFC published in the FRR, as raw response text.
    pub fn read_result<P: Port>(&self, session: &mut SamBaSession<P>) -> Result<String> {
        let frr = self.result_register()?;
        session.read_word(frr)
    }

    /// Read the flash mode register.
    pub fn read_mode<P: Port>(&self, session: &mut SamBaSession<P>) -> Result<u32> {
        let fmr = self.mode_register()?;
        session.read_word_value(fmr)
    }

    /// Write the flash mode register.
    pub fn set_mode<P: Port>(&self, session: &mut SamBaSession<P>, value: u32) -> Result<()> {
        let fmr = self.mode_register()?;
        debug!("Setting FMR to 0x{value:08X}");
        session.write_word(fmr, value)?;
        Ok(())
    }

    fn mode_register(&self) -> Result<u32> {
        self.profile.efc_mode_register.ok_or_else(|| {
            Error::Unsupported(format!("{} has no flash mode register", self.profile.name))
        })
    }

    /// Ask the EFC to publish its flash descriptor in the FRR.
    pub fn request_descriptor<P: Port>(&self, session: &mut SamBaSession<P>) -> Result<()> {
        let opcode = self.profile.get_descriptor_command.ok_or_else(|| {
            Error::Unsupported(format!("{} has no flash descriptor", self.profile.name))
        })?;
        self.result_register()?;
        self.wait_ready(session)?;
        self.command(session, opcode, 0)
    }

    /// Read the 128-bit unique identifier.
    ///
    /// The identifier is mapped over the start of flash between the start
    /// and stop commands; the mapping is always removed, even if a read in
    /// between fails.
    pub fn read_unique_id<P: Port>(&self, session: &mut SamBaSession<P>) -> Result<[u32; 4]> {
        let (Some(start), Some(stop)) =
            (self.profile.start_uid_command, self.profile.stop_uid_command)
        else {
            return Err(Error::Unsupported(format!(
                "{} has no unique identifier",
                self.profile.name
            )));
        };

        self.wait_ready(session)?;
        self.command(session, start, 0)?;

        let mut uid = [0u32; 4];
        let mut read = || -> Result<()> {
            for (i, word) in uid.iter_mut().enumerate() {
                let address = self.profile.flash_start_address + 4 * i as u32;
                *word = session.read_word_value(address)?;
            }
            Ok(())
        };
        let result = read();

        self.command(session, stop, 0)?;
        self.wait_ready(session)?;
        result?;

        debug!("Unique identifier: {uid:08X?}");
        Ok(uid)
    }
}

/// Format a unique identifier as 32 hex digits.
pub fn format_unique_id(uid: &[u32; 4]) -> String {
    uid.iter().map(|w| format!("{w:08X}")).collect()
}
