//! Device-specific flash programming on top of the SAM-BA session.
//!
//! - [`profile`]: per-chip constants
//! - [`efc`]: flash controller commands
//! - [`writer`] / [`verify`]: image programming and read-back
//! - [`chipid`] / [`descriptor`]: identification and flash geometry
//! - [`flasher`]: the combined workflow

pub mod chipid;
pub mod descriptor;
pub mod efc;
pub mod flasher;
pub mod profile;
pub mod verify;
pub mod writer;

pub use chipid::ChipIdentity;
pub use descriptor::FlashDescriptor;
pub use efc::{EfcConfig, EfcController};
pub use flasher::{FlasherConfig, SamBaFlasher, WriteOptions, WriteSummary};
pub use profile::{BOOT_BITS, DeviceProfile, EFC_KEY, builtin_profiles};
pub use verify::{Mismatch, Verifier, VerifyReport};
pub use writer::{PageWriter, WriteStrategy};
