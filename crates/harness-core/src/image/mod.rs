//! Program image model and textual image loading.

/// Intel HEX record parsing and validation.
pub mod hex;

pub use hex::{load, load_with_limit, ImageError, RecordKind};

/// Width in bytes of one native instruction word (AVR program memory).
pub const WORD_BYTES: usize = 2;

/// Default upper bound on program memory reachable by an image (32 KiB).
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 32 * 1024;

/// Immutable program image in the CPU model's native word width.
///
/// Words are stored little-endian-decoded, so `words()[0]` is the instruction
/// at `base_address()`. Addresses are byte addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BinaryImage {
    base_address: u32,
    words: Box<[u16]>,
    entry_point: Option<u32>,
}

impl BinaryImage {
    /// Creates an image from already-packed words.
    ///
    /// `base_address` is rounded down to a word boundary.
    #[must_use]
    pub fn from_words(base_address: u32, words: impl Into<Box<[u16]>>) -> Self {
        Self {
            base_address: base_address & !1,
            words: words.into(),
            entry_point: None,
        }
    }

    /// Returns a copy of this image carrying an explicit entry point.
    #[must_use]
    pub const fn with_entry_point(mut self, entry_point: Option<u32>) -> Self {
        self.entry_point = entry_point;
        self
    }

    /// Byte address of the first word.
    #[must_use]
    pub const fn base_address(&self) -> u32 {
        self.base_address
    }

    /// Packed instruction words in address order.
    #[must_use]
    pub fn words(&self) -> &[u16] {
        &self.words
    }

    /// Start address declared by the image, when it declared one.
    #[must_use]
    pub const fn entry_point(&self) -> Option<u32> {
        self.entry_point
    }

    /// Number of instruction words.
    #[must_use]
    pub fn len_words(&self) -> usize {
        self.words.len()
    }

    /// Returns true when the image holds no words.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Image size in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.words.len() * WORD_BYTES
    }

    /// Exclusive end byte address.
    #[must_use]
    pub fn end_address(&self) -> u64 {
        u64::from(self.base_address) + self.byte_len() as u64
    }

    /// Returns the word containing `byte_address`, if the image covers it.
    #[must_use]
    pub fn word_at(&self, byte_address: u32) -> Option<u16> {
        let offset = byte_address.checked_sub(self.base_address)? as usize / WORD_BYTES;
        self.words.get(offset).copied()
    }

    /// Places the image inside a zeroed program memory of `flash_words` words.
    ///
    /// Returns `None` when the image does not fit.
    #[must_use]
    pub fn to_flash(&self, flash_words: usize) -> Option<Vec<u16>> {
        let start = self.base_address as usize / WORD_BYTES;
        let end = start.checked_add(self.words.len())?;
        if end > flash_words {
            return None;
        }
        let mut flash = vec![0; flash_words];
        flash[start..end].copy_from_slice(&self.words);
        Some(flash)
    }
}
