//! Raw binary firmware images.
//!
//! An image is written verbatim from the first byte of the chosen start
//! page. The final page and the final word are padded with erased-flash
//! bytes (`0xFF`).

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Value of an erased flash byte.
pub const ERASED: u8 = 0xFF;

/// A firmware image held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    data: Vec<u8>,
}

impl Image {
    /// Load an image from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading image from: {}", path.display());

        let mut reader = BufReader::new(File::open(path)?);
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        debug!("Image is {} bytes", data.len());
        Ok(Self::from_bytes(data))
    }

    /// Wrap an in-memory image.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Raw image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image has no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of pages the image occupies. An exact multiple of `page_size`
    /// does not get an extra trailing page.
    pub fn page_count(&self, page_size: u32) -> usize {
        self.data.len().div_ceil(page_size as usize)
    }

    /// Iterate over pages, the last one padded to `page_size`.
    pub fn pages(&self, page_size: u32) -> impl Iterator<Item = Vec<u8>> + '_ {
        let page_size = page_size as usize;
        self.data.chunks(page_size).map(move |chunk| {
            let mut page = chunk.to_vec();
            page.resize(page_size, ERASED);
            page
        })
    }

    /// Iterate over `(byte offset, word value)` pairs, the word value being
    /// what a little-endian target reads back. A trailing partial word is
    /// padded with erased bytes.
    pub fn words(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.data.chunks(4).enumerate().map(|(i, chunk)| {
            let mut word = [ERASED; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            (i * 4, LittleEndian::read_u32(&word))
        })
    }

    /// Check that the image fits between `start_page` and `flash_size`.
    pub fn check_fits(&self, page_size: u32, start_page: u32, flash_size: Option<u32>) -> Result<()> {
        let Some(flash_size) = flash_size else {
            return Ok(());
        };
        let end = u64::from(start_page) * u64::from(page_size)
            + (self.page_count(page_size) as u64) * u64::from(page_size);
        if end > u64::from(flash_size) {
            return Err(Error::Config(format!(
                "image of {} bytes from page {start_page} does not fit in {flash_size} bytes of flash",
                self.len()
            )));
        }
        Ok(())
    }
}

/// Convert 4 image bytes to the value `write_word` must send.
pub fn word_value(bytes: &[u8]) -> u32 {
    LittleEndian::read_u32(bytes)
}
