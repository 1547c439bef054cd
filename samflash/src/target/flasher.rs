//! High-level flashing workflow for one device.

use crate::error::Result;
use crate::image::Image;
use crate::port::Port;
use crate::progress::Progress;
use crate::protocol::samba::{SamBaSession, SessionConfig};
use crate::protocol::xmodem::XmodemConfig;
use crate::target::chipid::ChipIdentity;
use crate::target::descriptor::FlashDescriptor;
use crate::target::efc::{EfcConfig, EfcController};
use crate::target::profile::DeviceProfile;
use crate::target::verify::{Verifier, VerifyReport};
use crate::target::writer::{PageWriter, WriteStrategy};
use log::{info, warn};
use std::thread;
use std::time::Duration;

/// Tunables for a [`SamBaFlasher`].
#[derive(Debug, Clone)]
pub struct FlasherConfig {
    /// Handshake and response timing.
    pub session: SessionConfig,
    /// Flash controller polling.
    pub efc: EfcConfig,
    /// XMODEM transfer settings.
    pub xmodem: XmodemConfig,
    /// Connection attempts before giving up on recoverable failures.
    pub connect_attempts: u32,
    /// Pause between connection attempts.
    pub connect_retry_delay: Duration,
}

impl Default for FlasherConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            efc: EfcConfig::default(),
            xmodem: XmodemConfig::default(),
            connect_attempts: 3,
            connect_retry_delay: Duration::from_millis(500),
        }
    }
}

/// Options for [`SamBaFlasher::write`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// How page data reaches the latch buffer.
    pub strategy: WriteStrategy,
    /// First flash page to write.
    pub start_page: u32,
    /// Apply the profile's boot configuration after writing.
    pub set_boot: bool,
    /// Reconnect and read the image back after writing.
    pub verify: bool,
}

/// Result of [`SamBaFlasher::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    /// Pages committed to flash.
    pub pages: u32,
    /// Read-back result when verification was requested.
    pub verify: Option<VerifyReport>,
}

/// Drives a device profile over one SAM-BA session.
pub struct SamBaFlasher<P: Port> {
    session: SamBaSession<P>,
    profile: DeviceProfile,
    config: FlasherConfig,
}

impl<P: Port> SamBaFlasher<P> {
    /// Build a flasher around an already opened port.
    pub fn new(port: P, profile: DeviceProfile, config: FlasherConfig) -> Result<Self> {
        profile.validate()?;
        let session = SamBaSession::with_config(port, config.session.clone());
        Ok(Self {
            session,
            profile,
            config,
        })
    }

    /// Device profile in use.
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Underlying SAM-BA session.
    pub fn session(&self) -> &SamBaSession<P> {
        &self.session
    }

    /// Mutable access to the session, for raw monitor commands.
    pub fn session_mut(&mut self) -> &mut SamBaSession<P> {
        &mut self.session
    }

    /// Connect, retrying recoverable failures.
    pub fn connect(&mut self) -> Result<()> {
        let attempts = self.config.connect_attempts.max(1);
        info!("Connecting to {} on {}", self.profile.name, self.session.port().name());

        let mut attempt = 1;
        loop {
            match self.session.connect(self.profile.autobaud) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_recoverable() && attempt < attempts => {
                    warn!("Connection failed (attempt {attempt}/{attempts}): {e}");
                    thread::sleep(self.config.connect_retry_delay);
                    attempt += 1;
                    info!("Connection attempt {attempt}/{attempts}");
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Write an image and optionally set the boot bits and verify it.
    pub fn write(
        &mut self,
        image: &Image,
        options: WriteOptions,
        progress: &mut dyn Progress,
    ) -> Result<WriteSummary> {
        let efc = efc(&self.profile, &self.config);
        let pages = PageWriter::new(&efc, options.strategy)
            .with_start_page(options.start_page)
            .with_xmodem_config(self.config.xmodem.clone())
            .write(&mut self.session, image, progress)?;

        if options.set_boot {
            efc.apply_boot_configuration(&mut self.session)?;
        }

        let verify = if options.verify {
            // Fresh handshake so the read-back does not depend on state
            // left over from the write.
            self.connect()?;
            Some(self.verify(image, options.start_page, progress)?)
        } else {
            None
        };

        Ok(WriteSummary { pages, verify })
    }

    /// Reject images that run past the end of flash.
    ///
    /// Only profiles with a flash descriptor know their size; others pass.
    pub fn check_image_fits(&mut self, image: &Image, start_page: u32) -> Result<()> {
        if self.profile.get_descriptor_command.is_none() {
            return Ok(());
        }
        let size = self.flash_descriptor()?.size;
        image.check_fits(self.profile.page_size, start_page, Some(size))
    }

    /// Compare flash from `start_page` against `image`.
    pub fn verify(
        &mut self,
        image: &Image,
        start_page: u32,
        progress: &mut dyn Progress,
    ) -> Result<VerifyReport> {
        Verifier::new(self.profile.page_address(start_page)).verify(&mut self.session, image, progress)
    }

    /// Apply the profile's GPNVM boot configuration.
    pub fn set_boot(&mut self) -> Result<()> {
        let efc = efc(&self.profile, &self.config);
        efc.apply_boot_configuration(&mut self.session)
    }

    /// Erase the whole flash.
    pub fn erase_all(&mut self) -> Result<()> {
        let efc = efc(&self.profile, &self.config);
        efc.erase_all(&mut self.session)
    }

    /// Read and decode CIDR/EXID.
    pub fn chip_identity(&mut self) -> Result<ChipIdentity> {
        ChipIdentity::read(&mut self.session, &self.profile)
    }

    /// Query the flash geometry.
    pub fn flash_descriptor(&mut self) -> Result<FlashDescriptor> {
        let efc = efc(&self.profile, &self.config);
        FlashDescriptor::read(&mut self.session, &efc)
    }

    /// Read the 128-bit unique identifier.
    pub fn unique_id(&mut self) -> Result<[u32; 4]> {
        let efc = efc(&self.profile, &self.config);
        efc.read_unique_id(&mut self.session)
    }

    /// Release the port.
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }
}

fn efc<'a>(profile: &'a DeviceProfile, config: &FlasherConfig) -> EfcController<'a> {
    EfcController::with_config(profile, config.efc.clone())
}

#[cfg(feature = "native")]
impl SamBaFlasher<crate::port::NativePort> {
    /// Open `serial` and build a flasher for `profile`.
    pub fn open(
        serial: &crate::port::SerialConfig,
        profile: DeviceProfile,
        config: FlasherConfig,
    ) -> Result<Self> {
        let port = crate::port::NativePort::open(serial)?;
        Self::new(port, profile, config)
    }
}
