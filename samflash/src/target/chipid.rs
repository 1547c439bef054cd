//! Chip identification register decoding.
//!
//! ```text
//!  31  30    28 27          20 19   16 15    12 11     8 7    5 4       0
//! +---+--------+--------------+-------+--------+--------+------+---------+
//! |EXT| NVPTYP |     ARCH     |SRAMSIZ|NVPSIZ2 | NVPSIZ | EPROC| VERSION |
//! +---+--------+--------------+-------+--------+--------+------+---------+
//! ```
//!
//! Each coded field is looked up in a fixed table. A code without a table
//! entry is reported as [`Error::Decode`] rather than silently defaulted.

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::samba::SamBaSession;
use crate::target::profile::DeviceProfile;
use std::fmt;

/// A decoded table entry: short mnemonic and human-readable description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code {
    /// Field value as read from the register.
    pub raw: u32,
    /// Short mnemonic.
    pub short: &'static str,
    /// Human-readable description.
    pub description: &'static str,
}

const EPROC: &[(u32, &str, &str)] = &[
    (1, "ARM946ES", "ARM946ES"),
    (2, "ARM7TDMI", "ARM7TDMI"),
    (3, "CM3", "Cortex-M3"),
    (4, "ARM920T", "ARM920T"),
    (5, "ARM926EJS", "ARM926EJS"),
    (6, "CA5", "Cortex-A5"),
    (7, "CM4", "Cortex-M4"),
];

const NVPSIZ: &[(u32, &str, &str)] = &[
    (0, "NONE", "None"),
    (1, "8K", "8K Bytes"),
    (2, "16K", "16K Bytes"),
    (3, "32K", "32K Bytes"),
    (5, "64K", "64K Bytes"),
    (7, "128K", "128K Bytes"),
    (9, "256K", "256K Bytes"),
    (10, "512K", "512K Bytes"),
    (12, "1024K", "1024K Bytes"),
    (14, "2048K", "2048K Bytes"),
];

const SRAMSIZ: &[(u32, &str, &str)] = &[
    (0, "48K", "48K bytes"),
    (1, "1K", "1K bytes"),
    (2, "2K", "2K bytes"),
    (3, "6K", "6K bytes"),
    (4, "24K", "24K bytes"),
    (5, "4K", "4K bytes"),
    (6, "80K", "80K bytes"),
    (7, "160K", "160K bytes"),
    (8, "8K", "8K bytes"),
    (9, "16K", "16K bytes"),
    (10, "32K", "32K bytes"),
    (11, "64K", "64K bytes"),
    (12, "128K", "128K bytes"),
    (13, "256K", "256K bytes"),
    (14, "96K", "96K bytes"),
    (15, "512K", "512K bytes"),
];

const ARCH: &[(u32, &str, &str)] = &[
    (0x19, "AT91SAM9xx", "AT91SAM9xx Series"),
    (0x29, "AT91SAM9XExx", "AT91SAM9XExx Series"),
    (0x34, "AT91x34", "AT91x34 Series"),
    (0x37, "CAP7", "CAP7 Series"),
    (0x39, "CAP9", "CAP9 Series"),
    (0x3B, "CAP11", "CAP11 Series"),
    (0x40, "AT91x40", "AT91x40 Series"),
    (0x42, "AT91x42", "AT91x42 Series"),
    (0x55, "AT91x55", "AT91x55 Series"),
    (0x60, "AT91SAM7Axx", "AT91SAM7Axx Series"),
    (0x61, "AT91SAM7AQxx", "AT91SAM7AQxx Series"),
    (0x63, "AT91x63", "AT91x63 Series"),
    (0x70, "AT91SAM7Sxx", "AT91SAM7Sxx Series"),
    (0x71, "AT91SAM7XCxx", "AT91SAM7XCxx Series"),
    (0x72, "AT91SAM7SExx", "AT91SAM7SExx Series"),
    (0x73, "AT91SAM7Lxx", "AT91SAM7Lxx Series"),
    (0x75, "AT91SAM7Xxx", "AT91SAM7Xxx Series"),
    (0x76, "AT91SAM7SLxx", "AT91SAM7SLxx Series"),
    (0x80, "SAM3UxC", "SAM3UxC Series(100 - pin version)"),
    (0x81, "SAM3UxE", "SAM3UxE Series(144 - pin version)"),
    (0x83, "SAM[3/4]AxC", "SAM[3/4]AxC Series(100 - pin version)"),
    (0x84, "SAM[3/4]XxC", "SAM[3/4]XxC Series(100 - pin version)"),
    (0x85, "SAM[3/4]XxE", "SAM[3/4]XxE Series(144 - pin version)"),
    (0x86, "SAM[3/4]XxG", "SAM[3/4]XxG Series(208 / 217 - pin version)"),
    (0x88, "SAM[3/4]SxA", "SAM[3/4]SxA Series(48 - pin version)"),
    (0x89, "SAM[3/4]SxB", "SAM[3/4]SxB Series(64 - pin version)"),
    (0x8A, "SAM[3/4]SxC", "SAM[3/4]SxC Series(100 - pin version)"),
    (0x92, "AT91x92", "AT91x92 Series"),
    (0x93, "SAM3NxA", "SAM3NxA Series(48 - pin version)"),
    (0x94, "SAM3NxB", "SAM3NxB Series(64 - pin version)"),
    (0x95, "SAM3NxC", "SAM3NxC Series(100 - pin version)"),
    (0x99, "SAM3SDxB", "SAM3SDxB Series(64 - pin version)"),
    (0x9A, "SAM3SDxC", "SAM3SDxC Series(100 - pin version)"),
    (0xA5, "SAM5A", "SAM5A"),
    (0xF0, "AT75Cxx", "AT75Cxx Series"),
];

const NVPTYP: &[(u32, &str, &str)] = &[
    (0, "ROM", "ROM"),
    (1, "ROMLESS", "ROMless or on-chip Flash"),
    (2, "FLASH", "Embedded Flash Memory"),
    (3, "ROM_FLASH", "ROM and Embedded Flash Memory"),
    (4, "SRAM", "SRAM emulating ROM"),
];

/// Extract bits `high..=low` of `value`.
fn bits(value: u32, high: u32, low: u32) -> u32 {
    (value >> low) & ((1 << (high - low + 1)) - 1)
}

fn lookup(table: &[(u32, &'static str, &'static str)], field: &'static str, raw: u32) -> Result<Code> {
    table
        .iter()
        .find(|(code, _, _)| *code == raw)
        .map(|&(raw, short, description)| Code {
            raw,
            short,
            description,
        })
        .ok_or(Error::Decode { field, code: raw })
}

/// Decoded chip identification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipIdentity {
    /// Raw CIDR value.
    pub cidr: u32,
    /// Raw EXID value.
    pub exid: u32,
    /// Chip version field.
    pub version: u32,
    /// Embedded processor.
    pub eproc: Code,
    /// Non-volatile program memory size.
    pub nvpsiz: Code,
    /// Second non-volatile program memory size.
    pub nvpsiz2: Code,
    /// Internal SRAM size.
    pub sramsiz: Code,
    /// Architecture identifier.
    pub arch: Code,
    /// Non-volatile program memory type.
    pub nvptyp: Code,
}

impl ChipIdentity {
    /// Decode raw CIDR and EXID values.
    pub fn decode(cidr: u32, exid: u32) -> Result<Self> {
        Ok(Self {
            cidr,
            exid,
            version: bits(cidr, 4, 0),
            eproc: lookup(EPROC, "eproc", bits(cidr, 7, 5))?,
            nvpsiz: lookup(NVPSIZ, "nvpsiz", bits(cidr, 11, 8))?,
            nvpsiz2: lookup(NVPSIZ, "nvpsiz2", bits(cidr, 15, 12))?,
            sramsiz: lookup(SRAMSIZ, "sramsiz", bits(cidr, 19, 16))?,
            arch: lookup(ARCH, "arch", bits(cidr, 27, 20))?,
            nvptyp: lookup(NVPTYP, "nvptyp", bits(cidr, 30, 28))?,
        })
    }

    /// Read CIDR and EXID through `session` and decode them.
    pub fn read<P: Port>(session: &mut SamBaSession<P>, profile: &DeviceProfile) -> Result<Self> {
        let cidr_address = profile.cidr_address.ok_or_else(|| {
            Error::Unsupported(format!("{} has no chip ID register", profile.name))
        })?;
        let cidr = session.read_word_value(cidr_address)?;
        let exid = match profile.exid_address {
            Some(address) => session.read_word_value(address)?,
            None => 0,
        };
        log::debug!("CIDR 0x{cidr:08X} EXID 0x{exid:08X}");
        Self::decode(cidr, exid)
    }

    /// `(label, value)` rows in report order.
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Version", self.version.to_string()),
            ("Embedded Processor", self.eproc.description.to_string()),
            ("Nonvolatile Program Size", self.nvpsiz.description.to_string()),
            ("Second Nonvolatile Program Size", self.nvpsiz2.description.to_string()),
            ("Internal SRAM Size", self.sramsiz.description.to_string()),
            ("Architecture Identifier", self.arch.description.to_string()),
            ("Nonvolatile Program Memory Type", self.nvptyp.description.to_string()),
            ("CIDR", format!("0x{:08X}", self.cidr)),
            ("EXID", format!("0x{:08X}", self.exid)),
        ]
    }
}

impl fmt::Display for ChipIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = self.rows();
        let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0) + 1;
        writeln!(f, "Chip ID :")?;
        for (label, value) in rows {
            writeln!(f, "{label:>width$} : {value}")?;
        }
        Ok(())
    }
}
