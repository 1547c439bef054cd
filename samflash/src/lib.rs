//! # samflash
//!
//! A library for programming the on-chip flash of Atmel/Microchip SAM
//! microcontrollers through the SAM-BA ROM monitor over a UART.
//!
//! This crate provides:
//!
//! - The SAM-BA text command protocol and session state machine
//! - An XMODEM sender for bulk page uploads
//! - Enhanced Embedded Flash Controller (EFC) sequencing: page writes,
//!   erase, GPNVM boot bits, flash descriptor and unique identifier
//! - Word-level read-back verification
//! - Chip identification register decoding
//!
//! ## Supported Chips
//!
//! - AT91SAM3U4E
//! - AT91SAM7X512
//! - Any other EFC-based part, through a custom [`DeviceProfile`]
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for profiles and discovery results
//!
//! ## Example
//!
//! ```rust,no_run
//! use samflash::{DeviceProfile, FlasherConfig, Image, NoProgress, SamBaFlasher, WriteOptions};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = Image::from_file("firmware.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let serial = samflash::SerialConfig::new("/dev/ttyUSB0", 115200);
//!         let profile = DeviceProfile::by_name("AT91SAM3U4E")?;
//!         let mut flasher = SamBaFlasher::open(&serial, profile, FlasherConfig::default())?;
//!         flasher.connect()?;
//!
//!         let options = WriteOptions {
//!             set_boot: true,
//!             verify: true,
//!             ..WriteOptions::default()
//!         };
//!         let summary = flasher.write(&image, options, &mut NoProgress)?;
//!         println!("Wrote {} pages", summary.pages);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod image;
pub mod port;
pub mod progress;
pub mod protocol;
pub mod target;

#[cfg(test)]
mod testing;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Polling loops
/// check it between iterations and fail with [`Error::Interrupted`].
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
thread_local! {
    static TEST_INTERRUPTED: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Toggle interruption for the calling test thread only.
#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    static INSTALLED: OnceLock<()> = OnceLock::new();

    INSTALLED.get_or_init(|| set_interrupt_checker(|| TEST_INTERRUPTED.with(std::cell::Cell::get)));
    TEST_INTERRUPTED.with(|flag| flag.set(value));
}

#[cfg(feature = "native")]
pub use {device::auto_detect_port, port::NativePort};
pub use {
    device::{BridgeKind, DetectedPort, detect_ports, format_port_list, select_port},
    error::{Error, Result},
    image::Image,
    port::{Port, SerialConfig},
    progress::{NoProgress, Progress},
    protocol::{SamBaSession, SessionConfig, SessionState, XmodemConfig},
    target::{
        ChipIdentity, DeviceProfile, EfcConfig, EfcController, FlashDescriptor, FlasherConfig,
        Mismatch, PageWriter, SamBaFlasher, Verifier, VerifyReport, WriteOptions, WriteStrategy,
        WriteSummary, builtin_profiles, efc::format_unique_id,
    },
};
