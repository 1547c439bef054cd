//! Flash descriptor published by the EFC.
//!
//! After a Get Descriptor command the FRR yields, one word per read:
//!
//! ```text
//! ID, SIZE, PAGE_SIZE, N, PLANE[0..N], M, LOCK[0..M]
//! ```

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::samba::SamBaSession;
use crate::target::efc::EfcController;
use log::debug;
use std::fmt;

/// Upper bound accepted for the plane and lock-region counts.
pub const MAX_ENTRIES: u32 = 256;

/// Parse a number with an optional radix prefix (`0x`, `0o`, `0b`), decimal otherwise.
pub fn parse_number(text: &str) -> Result<u32> {
    let t = text.trim();
    let lower = t.to_ascii_lowercase();
    let parsed = if let Some(hex) = lower.strip_prefix("0x") {
        u32::from_str_radix(hex, 16)
    } else if let Some(oct) = lower.strip_prefix("0o") {
        u32::from_str_radix(oct, 8)
    } else if let Some(bin) = lower.strip_prefix("0b") {
        u32::from_str_radix(bin, 2)
    } else {
        lower.parse::<u32>()
    };
    parsed.map_err(|_| Error::Protocol(format!("expected a number, got {t:?}")))
}

/// Flash geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashDescriptor {
    /// Raw identifier word, as returned by the monitor.
    pub id: String,
    /// Total flash size in bytes.
    pub size: u32,
    /// Page size in bytes.
    pub page_size: u32,
    /// Size of each plane in bytes.
    pub planes: Vec<u32>,
    /// Size of each lock region in bytes.
    pub locks: Vec<u32>,
}

impl FlashDescriptor {
    /// Build a descriptor from successive result words.
    ///
    /// Each count is read before the sizes it announces.
    pub fn from_results<F>(mut next: F) -> Result<Self>
    where
        F: FnMut() -> Result<String>,
    {
        let id = next()?.trim().to_string();
        let mut number = || next().and_then(|s| parse_number(&s));
        let size = number()?;
        let page_size = number()?;

        let plane_count = bounded(number()?, "plane")?;
        let planes = (0..plane_count)
            .map(|_| number())
            .collect::<Result<Vec<_>>>()?;

        let lock_count = bounded(number()?, "lock region")?;
        let locks = (0..lock_count)
            .map(|_| number())
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id,
            size,
            page_size,
            planes,
            locks,
        })
    }

    /// Issue Get Descriptor and read the result sequence.
    pub fn read<P: Port>(session: &mut SamBaSession<P>, efc: &EfcController<'_>) -> Result<Self> {
        efc.request_descriptor(session)?;
        let descriptor = Self::from_results(|| efc.read_result(session))?;
        debug!(
            "Flash descriptor: {} bytes, {} planes, {} lock regions",
            descriptor.size,
            descriptor.plane_count(),
            descriptor.lock_count()
        );
        Ok(descriptor)
    }

    /// Number of planes.
    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    /// Number of lock regions.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}

fn bounded(count: u32, what: &str) -> Result<u32> {
    if count > MAX_ENTRIES {
        return Err(Error::Protocol(format!(
            "implausible {what} count {count}"
        )));
    }
    Ok(count)
}

impl fmt::Display for FlashDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Flash Descriptor :")?;
        writeln!(f, "{:>18} : {}", "ID", self.id)?;
        writeln!(f, "{:>18} : {} bytes", "Size", self.size)?;
        writeln!(f, "{:>18} : {} bytes", "Page Size", self.page_size)?;
        writeln!(f, "{:>18} : {}", "No of Planes", self.plane_count())?;
        for (i, size) in self.planes.iter().enumerate() {
            writeln!(f, "{:>18} : {size} bytes", format!("Plane {i} Size"))?;
        }
        writeln!(f, "{:>18} : {}", "No of Lock Bits", self.lock_count())?;
        for (i, size) in self.locks.iter().enumerate() {
            writeln!(f, "{:>18} : {size} bytes", format!("Lock Region {i:>2} Size"))?;
        }
        Ok(())
    }
}
