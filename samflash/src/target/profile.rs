//! Per-chip constants consumed by the SAM-BA flashing logic.
//!
//! Chips differ only in data (register addresses, EFC opcodes, page size,
//! erase strategy, boot configuration), so a profile is a plain record and
//! the built-in table is a list of constructors.

use crate::error::{Error, Result};
use std::fmt;

/// EFC key byte that must accompany every command written to the FCR.
pub const EFC_KEY: u8 = 0x5A;

/// Number of GPNVM bits involved in the boot configuration.
pub const BOOT_BITS: usize = 3;

/// Flash programming constants for one chip.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceProfile {
    /// Profile name, e.g. `AT91SAM3U4E`.
    pub name: String,
    /// EFC command register (FCR) address.
    pub efc_command_register: u32,
    /// EFC status register (FSR) address.
    pub efc_status_register: u32,
    /// EFC result register (FRR) address, when the controller has one.
    #[cfg_attr(feature = "serde", serde(default))]
    pub efc_result_register: Option<u32>,
    /// EFC mode register (FMR) address.
    #[cfg_attr(feature = "serde", serde(default))]
    pub efc_mode_register: Option<u32>,
    /// Whether the monitor needs the auto-baud probe before the handshake.
    #[cfg_attr(feature = "serde", serde(default))]
    pub autobaud: bool,
    /// Whether the whole flash must be erased before pages are written.
    #[cfg_attr(feature = "serde", serde(default))]
    pub full_erase: bool,
    /// Opcode that commits the page buffer (write page or erase-write page).
    pub write_page_command: u8,
    /// Opcode for erase-all, required when `full_erase` is set.
    #[cfg_attr(feature = "serde", serde(default))]
    pub erase_all_command: Option<u8>,
    /// First address of the on-chip flash.
    pub flash_start_address: u32,
    /// Page size in bytes, a non-zero multiple of 4.
    pub page_size: u32,
    /// Opcode to set a GPNVM bit.
    pub set_gpnvm_command: u8,
    /// Opcode to clear a GPNVM bit.
    pub clear_gpnvm_command: u8,
    /// Desired state of GPNVM bits 0..3 for booting from flash.
    pub boot_bits: [bool; BOOT_BITS],
    /// Chip identification register address.
    #[cfg_attr(feature = "serde", serde(default))]
    pub cidr_address: Option<u32>,
    /// Chip extension identification register address.
    #[cfg_attr(feature = "serde", serde(default))]
    pub exid_address: Option<u32>,
    /// Opcode that makes the EFC publish its flash descriptor in the FRR.
    #[cfg_attr(feature = "serde", serde(default))]
    pub get_descriptor_command: Option<u8>,
    /// Opcode that maps the unique identifier over the flash start.
    #[cfg_attr(feature = "serde", serde(default))]
    pub start_uid_command: Option<u8>,
    /// Opcode that unmaps the unique identifier.
    #[cfg_attr(feature = "serde", serde(default))]
    pub stop_uid_command: Option<u8>,
    /// FMR value to program before XMODEM page writes (flash wait states).
    #[cfg_attr(feature = "serde", serde(default))]
    pub xmodem_flash_mode: Option<u32>,
}

impl DeviceProfile {
    /// SAM3U4E: 256 KiB per plane, erase-write page, boots from flash with GPNVM1.
    pub fn at91sam3u4e() -> Self {
        Self {
            name: "AT91SAM3U4E".to_string(),
            efc_command_register: 0x400E_0804,
            efc_status_register: 0x400E_0808,
            efc_result_register: Some(0x400E_080C),
            efc_mode_register: Some(0x400E_0800),
            autobaud: false,
            full_erase: false,
            write_page_command: 0x03,
            erase_all_command: None,
            flash_start_address: 0x0008_0000,
            page_size: 256,
            set_gpnvm_command: 0x0B,
            clear_gpnvm_command: 0x0C,
            boot_bits: [false, true, false],
            cidr_address: Some(0x400E_0740),
            exid_address: Some(0x400E_0744),
            get_descriptor_command: Some(0x00),
            start_uid_command: Some(0x0E),
            stop_uid_command: Some(0x0F),
            // Errata: XMODEM writes need 6 wait states.
            xmodem_flash_mode: Some(0x0000_0600),
        }
    }

    /// SAM7X512: needs auto-baud and a full erase, boots from flash with GPNVM2.
    pub fn at91sam7x512() -> Self {
        Self {
            name: "AT91SAM7X512".to_string(),
            efc_command_register: 0xFFFF_FF64,
            efc_status_register: 0xFFFF_FF68,
            efc_result_register: None,
            efc_mode_register: Some(0xFFFF_FF60),
            autobaud: true,
            full_erase: true,
            write_page_command: 0x01,
            erase_all_command: Some(0x08),
            flash_start_address: 0x0010_0000,
            page_size: 256,
            set_gpnvm_command: 0x0B,
            clear_gpnvm_command: 0x0D,
            boot_bits: [false, false, true],
            cidr_address: Some(0xFFFF_F240),
            exid_address: Some(0xFFFF_F244),
            get_descriptor_command: None,
            start_uid_command: None,
            stop_uid_command: None,
            xmodem_flash_mode: None,
        }
    }

    /// Look up a built-in profile by name (case-insensitive).
    ///
    /// The `AT91` prefix may be omitted, so `sam3u4e` and `ATSAM3U4E` both
    /// resolve to `AT91SAM3U4E`.
    pub fn by_name(name: &str) -> Result<Self> {
        let wanted = normalize_name(name);
        builtin_profiles()
            .into_iter()
            .find(|p| normalize_name(&p.name) == wanted)
            .ok_or_else(|| Error::UnknownDevice(name.to_string()))
    }

    /// Check the invariants the flashing code relies on.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size % 4 != 0 {
            return Err(Error::Config(format!(
                "{}: page size {} is not a non-zero multiple of 4",
                self.name, self.page_size
            )));
        }
        if self.full_erase && self.erase_all_command.is_none() {
            return Err(Error::Config(format!(
                "{}: full erase requested without an erase-all opcode",
                self.name
            )));
        }
        if self.start_uid_command.is_some() != self.stop_uid_command.is_some() {
            return Err(Error::Config(format!(
                "{}: unique identifier needs both start and stop opcodes",
                self.name
            )));
        }
        Ok(())
    }

    /// Address of the first byte of `page`.
    pub fn page_address(&self, page: u32) -> u32 {
        self.flash_start_address
            .wrapping_add(page.wrapping_mul(self.page_size))
    }
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (flash @ 0x{:08X}, {}-byte pages)",
            self.name, self.flash_start_address, self.page_size
        )
    }
}

fn normalize_name(name: &str) -> String {
    let upper = name.trim().to_ascii_uppercase();
    let stripped = upper
        .strip_prefix("AT91")
        .or_else(|| upper.strip_prefix("AT"))
        .unwrap_or(&upper);
    stripped.to_string()
}

/// All profiles shipped with the library.
pub fn builtin_profiles() -> Vec<DeviceProfile> {
    vec![DeviceProfile::at91sam3u4e(), DeviceProfile::at91sam7x512()]
}
