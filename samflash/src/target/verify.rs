//! Read-back verification.

use crate::error::{Error, Result};
use crate::image::Image;
use crate::port::Port;
use crate::progress::Progress;
use crate::protocol::samba::SamBaSession;
use log::{error, info};

/// One word that did not read back as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    /// Word address.
    pub address: u32,
    /// Value taken from the image.
    pub expected: u32,
    /// Value read back.
    pub actual: u32,
}

/// Outcome of a verification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Words compared.
    pub words: usize,
    /// Words that differed, in address order.
    pub mismatches: Vec<Mismatch>,
}

impl VerifyReport {
    /// Number of mismatched words.
    pub fn error_count(&self) -> usize {
        self.mismatches.len()
    }

    /// Whether every word matched.
    pub fn is_ok(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Compares flash contents against an image, word by word.
///
/// Mismatches are collected and never stop the pass; link or protocol
/// failures do.
#[derive(Debug, Clone, Copy)]
pub struct Verifier {
    start_address: u32,
}

impl Verifier {
    /// Verify an image placed at `start_address`.
    pub fn new(start_address: u32) -> Self {
        Self { start_address }
    }

    /// Read back every word of `image` and compare.
    pub fn verify<P: Port>(
        &self,
        session: &mut SamBaSession<P>,
        image: &Image,
        progress: &mut dyn Progress,
    ) -> Result<VerifyReport> {
        info!(
            "Verifying {} bytes at 0x{:08X}",
            image.len(),
            self.start_address
        );
        let mut report = VerifyReport::default();
        progress.begin(image.len() as u64);

        for (offset, expected) in image.words() {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            let address = self.start_address + offset as u32;
            let actual = session.read_word_value(address)?;
            report.words += 1;
            if actual != expected {
                error!(
                    "Verification failed at 0x{address:08X}: expected 0x{expected:08X}, read 0x{actual:08X}"
                );
                report.mismatches.push(Mismatch {
                    address,
                    expected,
                    actual,
                });
            }
            let consumed = (image.len() - offset).min(4);
            progress.advance(consumed as u64, "verify");
        }
        progress.finish();

        if report.is_ok() {
            info!("Verification passed ({} words)", report.words);
        } else {
            error!("Verification found {} mismatched words", report.error_count());
        }
        Ok(report)
    }
}
