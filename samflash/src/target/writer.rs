//! Page-by-page flash programming.
//!
//! ```text
//! [erase all]                    (profiles with full_erase)
//! for each page from start_page:
//!     wait ready
//!     fill page buffer           (raw words or XMODEM)
//!     write page trigger
//! wait ready                     (last page committed)
//! ```

use crate::error::{Error, Result};
use crate::image::{word_value, Image};
use crate::port::Port;
use crate::progress::Progress;
use crate::protocol::samba::SamBaSession;
use crate::protocol::xmodem::{XmodemConfig, XmodemTransfer};
use crate::target::efc::EfcController;
use log::{debug, info};

/// How page contents travel to the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum WriteStrategy {
    /// One `W` command per word.
    #[default]
    Raw,
    /// One XMODEM upload per page.
    Xmodem,
}

/// Streams an image into flash.
pub struct PageWriter<'a> {
    efc: &'a EfcController<'a>,
    strategy: WriteStrategy,
    start_page: u32,
    xmodem: XmodemConfig,
}

impl<'a> PageWriter<'a> {
    /// Writer for `efc`'s device using `strategy`, starting at page 0.
    pub fn new(efc: &'a EfcController<'a>, strategy: WriteStrategy) -> Self {
        Self {
            efc,
            strategy,
            start_page: 0,
            xmodem: XmodemConfig::default(),
        }
    }

    /// First flash page to write.
    #[must_use]
    pub fn with_start_page(mut self, start_page: u32) -> Self {
        self.start_page = start_page;
        self
    }

    /// XMODEM timing used by [`WriteStrategy::Xmodem`].
    #[must_use]
    pub fn with_xmodem_config(mut self, config: XmodemConfig) -> Self {
        self.xmodem = config;
        self
    }

    /// Write `image` and return the number of pages written.
    pub fn write<P: Port>(
        &self,
        session: &mut SamBaSession<P>,
        image: &Image,
        progress: &mut dyn Progress,
    ) -> Result<u32> {
        let profile = self.efc.profile();
        profile.validate()?;
        let page_count = image.page_count(profile.page_size);
        info!(
            "Writing {} bytes ({page_count} pages) to {} using {:?} strategy",
            image.len(),
            profile.name,
            self.strategy
        );

        if profile.full_erase {
            self.efc.erase_all(session)?;
        }

        if self.strategy == WriteStrategy::Xmodem {
            if let Some(mode) = profile.xmodem_flash_mode {
                self.efc.set_mode(session, mode)?;
            }
        }

        progress.begin(page_count as u64);
        let mut page = self.start_page;
        for data in image.pages(profile.page_size) {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            self.efc.wait_ready(session)?;
            let address = profile.page_address(page);
            debug!("Writing page {page} at 0x{address:08X}");
            match self.strategy {
                WriteStrategy::Raw => Self::raw_write_page(session, address, &data)?,
                WriteStrategy::Xmodem => self.xmodem_write_page(session, address, &data)?,
            }
            self.efc.write_page_trigger(session, page)?;
            progress.advance(1, &format!("page {page}"));
            page += 1;
        }
        if page > self.start_page {
            self.efc.wait_ready(session)?;
        }
        progress.finish();

        Ok(page - self.start_page)
    }

    fn raw_write_page<P: Port>(session: &mut SamBaSession<P>, address: u32, data: &[u8]) -> Result<()> {
        let mut word_address = address;
        for word in data.chunks_exact(4) {
            session.write_word(word_address, word_value(word))?;
            word_address += 4;
        }
        Ok(())
    }

    fn xmodem_write_page<P: Port>(
        &self,
        session: &mut SamBaSession<P>,
        address: u32,
        data: &[u8],
    ) -> Result<()> {
        session.xm_init_send(address)?;
        XmodemTransfer::with_config(session.port_mut(), self.xmodem.clone())
            .send(data, |_, _| {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::RecordedProgress;
    use crate::protocol::samba::SessionConfig;
    use crate::target::efc::EfcConfig;
    use crate::target::DeviceProfile;
    use crate::testing::SimulatedMonitor;
    use std::time::Duration;

    fn fast_efc(profile: &DeviceProfile) -> EfcController<'_> {
        EfcController::with_config(
            profile,
            EfcConfig {
                poll_interval: Duration::ZERO,
                ready_timeout: Duration::from_millis(200),
            },
        )
    }

    fn fast_xmodem() -> XmodemConfig {
        XmodemConfig {
            char_timeout: Duration::from_millis(10),
            start_timeout: Duration::from_millis(100),
            max_retries: 3,
        }
    }

    fn connected(profile: &DeviceProfile) -> SamBaSession<SimulatedMonitor> {
        let mut s = SamBaSession::with_config(
            SimulatedMonitor::new(profile.clone()),
            SessionConfig::default().without_delays(),
        );
        s.connect(profile.autobaud).unwrap();
        s
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_raw_write_lands_in_flash() {
        let profile = DeviceProfile::at91sam3u4e();
        let efc = fast_efc(&profile);
        let mut s = connected(&profile);
        let image = Image::from_bytes(pattern(600));
        let mut progress = RecordedProgress::default();

        let pages = PageWriter::new(&efc, WriteStrategy::Raw)
            .write(&mut s, &image, &mut progress)
            .unwrap();

        assert_eq!(pages, 3);
        assert_eq!(s.port().memory(0x0008_0000, 600), image.data());
        assert!(s.port().memory(0x0008_0000 + 600, 168).iter().all(|&b| b == 0xFF));
        assert_eq!(progress.total, Some(3));
        assert_eq!(progress.done(), 3);
        assert!(progress.finished);
    }

    #[test]
    fn test_raw_word_is_byte_reversed() {
        let profile = DeviceProfile::at91sam3u4e();
        let efc = fast_efc(&profile);
        let mut s = connected(&profile);
        let image = Image::from_bytes(vec![0x01, 0x02, 0x03, 0x04]);

        PageWriter::new(&efc, WriteStrategy::Raw)
            .write(&mut s, &image, &mut crate::progress::NoProgress)
            .unwrap();

        assert!(s.port().commands().contains(&"W00080000,04030201#".to_string()));
        // Padding words follow the image word.
        assert!(s.port().commands().contains(&"W00080004,FFFFFFFF#".to_string()));
    }

    #[test]
    fn test_exact_multiple_has_no_extra_page() {
        let profile = DeviceProfile::at91sam3u4e();
        let efc = fast_efc(&profile);
        let mut s = connected(&profile);
        let image = Image::from_bytes(pattern(512));

        let pages = PageWriter::new(&efc, WriteStrategy::Raw)
            .write(&mut s, &image, &mut crate::progress::NoProgress)
            .unwrap();

        assert_eq!(pages, 2);
        let triggers: Vec<u16> = s
            .port()
            .efc_log()
            .iter()
            .filter(|c| c.opcode == profile.write_page_command)
            .map(|c| c.arg)
            .collect();
        assert_eq!(triggers, [0, 1]);
    }

    #[test]
    fn test_empty_image_writes_nothing() {
        let profile = DeviceProfile::at91sam3u4e();
        let efc = fast_efc(&profile);
        let mut s = connected(&profile);

        let pages = PageWriter::new(&efc, WriteStrategy::Raw)
            .write(&mut s, &Image::from_bytes(Vec::new()), &mut crate::progress::NoProgress)
            .unwrap();

        assert_eq!(pages, 0);
        assert!(s.port().efc_log().is_empty());
    }

    #[test]
    fn test_start_page_offsets_addresses() {
        let profile = DeviceProfile::at91sam3u4e();
        let efc = fast_efc(&profile);
        let mut s = connected(&profile);
        let image = Image::from_bytes(pattern(256));

        PageWriter::new(&efc, WriteStrategy::Raw)
            .with_start_page(4)
            .write(&mut s, &image, &mut crate::progress::NoProgress)
            .unwrap();

        assert_eq!(s.port().memory(0x0008_0400, 256), image.data());
        assert_eq!(s.port().efc_log().last().unwrap().arg, 4);
    }

    #[test]
    fn test_full_erase_runs_once_before_first_page() {
        let profile = DeviceProfile::at91sam7x512();
        let efc = fast_efc(&profile);
        let mut s = connected(&profile);
        s.port_mut().corrupt_byte(0x0010_1000, 0x00);
        let image = Image::from_bytes(pattern(520));

        PageWriter::new(&efc, WriteStrategy::Raw)
            .write(&mut s, &image, &mut crate::progress::NoProgress)
            .unwrap();

        let opcodes: Vec<u8> = s.port().efc_log().iter().map(|c| c.opcode).collect();
        assert_eq!(opcodes, [0x08, 0x01, 0x01, 0x01]);
        assert!(!opcodes.contains(&0x03));
        assert_eq!(s.port().memory_byte(0x0010_1000), 0xFF);
        assert_eq!(s.port().memory(0x0010_0000, 520), image.data());
    }

    #[test]
    fn test_xmodem_write_lands_in_flash() {
        let profile = DeviceProfile::at91sam3u4e();
        let efc = fast_efc(&profile);
        let mut s = connected(&profile);
        let image = Image::from_bytes(pattern(300));

        let pages = PageWriter::new(&efc, WriteStrategy::Xmodem)
            .with_xmodem_config(fast_xmodem())
            .write(&mut s, &image, &mut crate::progress::NoProgress)
            .unwrap();

        assert_eq!(pages, 2);
        assert_eq!(s.port().memory(0x0008_0000, 300), image.data());
        assert!(s.port().memory(0x0008_0000 + 300, 212).iter().all(|&b| b == 0xFF));
        assert_eq!(s.port().memory_word(0x400E_0800), 0x600);
        let uploads: Vec<&String> = s
            .port()
            .commands()
            .iter()
            .filter(|c| c.starts_with('S'))
            .collect();
        assert_eq!(uploads, ["S00080000,#", "S00080100,#"]);
    }

    #[test]
    fn test_xmodem_checksum_mode() {
        let profile = DeviceProfile::at91sam3u4e();
        let efc = fast_efc(&profile);
        let mut s = connected(&profile);
        s.port_mut().set_xmodem_checksum(true);
        let image = Image::from_bytes(pattern(256));

        PageWriter::new(&efc, WriteStrategy::Xmodem)
            .with_xmodem_config(fast_xmodem())
            .write(&mut s, &image, &mut crate::progress::NoProgress)
            .unwrap();

        assert_eq!(s.port().memory(0x0008_0000, 256), image.data());
    }

    #[test]
    fn test_xmodem_silent_receiver_is_hard_error() {
        let profile = DeviceProfile::at91sam3u4e();
        let efc = fast_efc(&profile);
        let mut s = connected(&profile);
        let image = Image::from_bytes(pattern(256));
        s.port_mut().set_xmodem_silent(true);

        let err = PageWriter::new(&efc, WriteStrategy::Xmodem)
            .with_xmodem_config(fast_xmodem())
            .write(&mut s, &image, &mut crate::progress::NoProgress)
            .unwrap_err();

        assert!(matches!(err, Error::Xmodem(_)));
        assert!(s.port().efc_log().iter().all(|c| c.opcode != profile.write_page_command));
    }

    #[test]
    fn test_waits_for_last_page_to_commit() {
        let profile = DeviceProfile::at91sam3u4e();
        let efc = fast_efc(&profile);
        let mut s = connected(&profile);
        s.port_mut().set_busy_polls(3);
        let image = Image::from_bytes(pattern(256));

        PageWriter::new(&efc, WriteStrategy::Raw)
            .write(&mut s, &image, &mut crate::progress::NoProgress)
            .unwrap();

        let commands = s.port().commands();
        let trigger = commands
            .iter()
            .rposition(|c| c.starts_with("W400E0804,"))
            .unwrap();
        let tail = &commands[trigger + 1..];
        assert_eq!(tail.len(), 4);
        assert!(tail.iter().all(|c| c == "w400E0808,#"));
    }

    #[test]
    fn test_last_page_timeout_is_reported() {
        let profile = DeviceProfile::at91sam3u4e();
        let efc = EfcController::with_config(
            &profile,
            EfcConfig {
                poll_interval: Duration::ZERO,
                ready_timeout: Duration::from_millis(20),
            },
        );
        let mut s = connected(&profile);
        // Busy for far longer than the ready timeout after each command.
        s.port_mut().set_busy_polls(u32::MAX);
        let image = Image::from_bytes(pattern(64));

        let err = PageWriter::new(&efc, WriteStrategy::Raw)
            .write(&mut s, &image, &mut crate::progress::NoProgress)
            .unwrap_err();

        assert!(matches!(err, Error::DeviceNotResponding { .. }));
        assert_eq!(s.port().efc_log().len(), 1);
    }

    #[test]
    fn test_rejects_page_size_not_word_aligned() {
        let mut profile = DeviceProfile::at91sam3u4e();
        profile.page_size = 6;
        let efc = fast_efc(&profile);
        let mut s = connected(&DeviceProfile::at91sam3u4e());

        let err = PageWriter::new(&efc, WriteStrategy::Raw)
            .write(&mut s, &Image::from_bytes(vec![0xAB; 6]), &mut crate::progress::NoProgress)
            .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
        assert!(s.port().commands().iter().all(|c| !c.starts_with('W')));

        profile.page_size = 0;
        let efc = fast_efc(&profile);
        assert!(matches!(
            PageWriter::new(&efc, WriteStrategy::Raw).write(
                &mut s,
                &Image::from_bytes(vec![0xAB; 6]),
                &mut crate::progress::NoProgress
            ),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_interrupt_stops_page_loop() {
        let profile = DeviceProfile::at91sam3u4e();
        let efc = fast_efc(&profile);
        let mut s = connected(&profile);
        let image = Image::from_bytes(pattern(512));

        crate::test_set_interrupted(true);
        let result = PageWriter::new(&efc, WriteStrategy::Raw).write(
            &mut s,
            &image,
            &mut crate::progress::NoProgress,
        );
        crate::test_set_interrupted(false);

        assert!(matches!(result, Err(Error::Interrupted)));
        assert!(s.port().efc_log().is_empty());
    }
}
