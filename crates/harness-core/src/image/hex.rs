//! Intel HEX loader.
//!
//! Every record is checked for start code, digit count, declared length and
//! checksum before any of its bytes are used. The first bad record aborts the
//! load; no partially populated image is ever returned.

use thiserror::Error;

use super::{BinaryImage, DEFAULT_MAX_IMAGE_BYTES, WORD_BYTES};

/// Smallest well-formed record: count, two address bytes, type, checksum.
const RECORD_OVERHEAD_BYTES: usize = 5;

/// Intel HEX record types understood by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// `00`: payload bytes at the current address.
    Data,
    /// `01`: terminates the image.
    EndOfFile,
    /// `02`: segment base (`value << 4`) for following data records.
    ExtendedSegmentAddress,
    /// `03`: `CS:IP` start address.
    StartSegmentAddress,
    /// `04`: upper 16 address bits for following data records.
    ExtendedLinearAddress,
    /// `05`: 32-bit start address.
    StartLinearAddress,
}

impl RecordKind {
    /// Decodes the record type byte.
    #[must_use]
    pub const fn from_u8(kind: u8) -> Option<Self> {
        match kind {
            0x00 => Some(Self::Data),
            0x01 => Some(Self::EndOfFile),
            0x02 => Some(Self::ExtendedSegmentAddress),
            0x03 => Some(Self::StartSegmentAddress),
            0x04 => Some(Self::ExtendedLinearAddress),
            0x05 => Some(Self::StartLinearAddress),
            _ => None,
        }
    }

    /// Payload length the record type requires, if it is fixed.
    #[must_use]
    pub const fn fixed_len(self) -> Option<u8> {
        match self {
            Self::Data => None,
            Self::EndOfFile => Some(0),
            Self::ExtendedSegmentAddress | Self::ExtendedLinearAddress => Some(2),
            Self::StartSegmentAddress | Self::StartLinearAddress => Some(4),
        }
    }
}

/// Reasons an image text is rejected. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ImageError {
    /// Record does not begin with `:`.
    #[error("line {line}: record does not start with ':'")]
    MissingStartCode {
        /// Offending line.
        line: usize,
    },
    /// Record body has an odd number of hex digits.
    #[error("line {line}: odd number of hex digits")]
    OddDigitCount {
        /// Offending line.
        line: usize,
    },
    /// Record body contains a non-hex character.
    #[error("line {line}: invalid hex digit at column {column}")]
    InvalidHexDigit {
        /// Offending line.
        line: usize,
        /// 1-based column of the bad character.
        column: usize,
    },
    /// Record is too short to hold the fixed fields.
    #[error("line {line}: record is shorter than {RECORD_OVERHEAD_BYTES} bytes")]
    Truncated {
        /// Offending line.
        line: usize,
    },
    /// Declared byte count disagrees with the payload present.
    #[error("line {line}: byte count {declared} does not match {actual} payload bytes")]
    LengthMismatch {
        /// Offending line.
        line: usize,
        /// Byte count field value.
        declared: u8,
        /// Payload bytes actually present.
        actual: usize,
    },
    /// Record checksum does not cancel the record sum.
    #[error("line {line}: checksum {found:#04x} does not match computed {computed:#04x}")]
    ChecksumMismatch {
        /// Offending line.
        line: usize,
        /// Checksum byte in the record.
        found: u8,
        /// Checksum the record contents require.
        computed: u8,
    },
    /// Record type outside `00..=05`.
    #[error("line {line}: unsupported record type {kind:#04x}")]
    UnsupportedRecordType {
        /// Offending line.
        line: usize,
        /// Record type byte.
        kind: u8,
    },
    /// Address or end-of-file record with the wrong payload length.
    #[error("line {line}: record type {kind:#04x} cannot carry {len} bytes")]
    InvalidRecordLength {
        /// Offending line.
        line: usize,
        /// Record type byte.
        kind: u8,
        /// Payload length found.
        len: u8,
    },
    /// A record follows the end-of-file record.
    #[error("line {line}: record follows the end-of-file record")]
    DataAfterEndOfFile {
        /// Offending line.
        line: usize,
    },
    /// Input ended without an end-of-file record.
    #[error("missing end-of-file record")]
    MissingEndOfFile,
    /// Input contained no data bytes.
    #[error("image contains no data records")]
    Empty,
    /// Data extends past the configured program memory.
    #[error("image ends at {end:#x}, beyond the {limit:#x}-byte program memory")]
    TooLarge {
        /// Exclusive end byte address of the offending data.
        end: u64,
        /// Configured program memory size in bytes.
        limit: usize,
    },
}

/// One validated record.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Record {
    kind: RecordKind,
    offset: u16,
    data: Vec<u8>,
}

/// Loads an image bounded by [`DEFAULT_MAX_IMAGE_BYTES`].
///
/// # Errors
///
/// Returns the first [`ImageError`] found in `raw`.
pub fn load(raw: &str) -> Result<BinaryImage, ImageError> {
    load_with_limit(raw, DEFAULT_MAX_IMAGE_BYTES)
}

/// Loads an image whose data must lie below `max_bytes`.
///
/// Gaps between data records are zero-filled; a trailing odd byte is padded
/// with zero so the image packs into whole little-endian words.
///
/// # Errors
///
/// Returns the first [`ImageError`] found in `raw`, or
/// [`ImageError::TooLarge`] when data reaches past `max_bytes`.
pub fn load_with_limit(raw: &str, max_bytes: usize) -> Result<BinaryImage, ImageError> {
    let mut upper_base: u64 = 0;
    let mut entry_point = None;
    let mut saw_eof = false;
    let mut chunks: Vec<(u64, Vec<u8>)> = Vec::new();

    for (index, line) in raw.lines().enumerate() {
        let line_no = index + 1;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if saw_eof {
            return Err(ImageError::DataAfterEndOfFile { line: line_no });
        }

        let record = parse_record(line_no, text)?;
        match record.kind {
            RecordKind::Data => {
                if record.data.is_empty() {
                    continue;
                }
                let start = upper_base + u64::from(record.offset);
                let end = start + record.data.len() as u64;
                if end > max_bytes as u64 {
                    return Err(ImageError::TooLarge {
                        end,
                        limit: max_bytes,
                    });
                }
                chunks.push((start, record.data));
            }
            RecordKind::EndOfFile => saw_eof = true,
            RecordKind::ExtendedSegmentAddress => {
                upper_base = u64::from(be_u16(&record.data)) << 4;
            }
            RecordKind::ExtendedLinearAddress => {
                upper_base = u64::from(be_u16(&record.data)) << 16;
            }
            RecordKind::StartSegmentAddress => {
                let segment = u32::from(be_u16(&record.data[..2]));
                let offset = u32::from(be_u16(&record.data[2..]));
                entry_point = Some((segment << 4).wrapping_add(offset));
            }
            RecordKind::StartLinearAddress => {
                entry_point = Some(u32::from_be_bytes([
                    record.data[0],
                    record.data[1],
                    record.data[2],
                    record.data[3],
                ]));
            }
        }
    }

    if !saw_eof {
        return Err(ImageError::MissingEndOfFile);
    }

    let (Some(low), Some(high)) = (
        chunks.iter().map(|(start, _)| *start).min(),
        chunks
            .iter()
            .map(|(start, data)| start + data.len() as u64)
            .max(),
    ) else {
        return Err(ImageError::Empty);
    };

    let too_large = |_| ImageError::TooLarge {
        end: high,
        limit: max_bytes,
    };
    let base = usize::try_from(low).map_err(too_large)? & !1;
    let span = (usize::try_from(high).map_err(too_large)? - base).next_multiple_of(WORD_BYTES);
    let mut bytes = vec![0u8; span];
    for (start, data) in &chunks {
        let offset = usize::try_from(*start).map_err(too_large)? - base;
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    let words: Vec<u16> = bytes
        .chunks_exact(WORD_BYTES)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    let base = u32::try_from(base).map_err(too_large)?;
    let image = BinaryImage::from_words(base, words).with_entry_point(entry_point);
    log::debug!(
        "loaded image: {} words at {:#06x}, entry {:?}",
        image.len_words(),
        image.base_address(),
        image.entry_point()
    );
    Ok(image)
}

fn parse_record(line: usize, text: &str) -> Result<Record, ImageError> {
    let Some(body) = text.strip_prefix(':') else {
        return Err(ImageError::MissingStartCode { line });
    };
    let digits = body.as_bytes();
    if digits.len() % 2 != 0 {
        return Err(ImageError::OddDigitCount { line });
    }

    let mut bytes = Vec::with_capacity(digits.len() / 2);
    for (pair_index, pair) in digits.chunks_exact(2).enumerate() {
        let column = 2 + pair_index * 2;
        let high = hex_value(pair[0]).ok_or(ImageError::InvalidHexDigit { line, column })?;
        let low = hex_value(pair[1]).ok_or(ImageError::InvalidHexDigit {
            line,
            column: column + 1,
        })?;
        bytes.push((high << 4) | low);
    }

    if bytes.len() < RECORD_OVERHEAD_BYTES {
        return Err(ImageError::Truncated { line });
    }

    let declared = bytes[0];
    let actual = bytes.len() - RECORD_OVERHEAD_BYTES;
    if usize::from(declared) != actual {
        return Err(ImageError::LengthMismatch {
            line,
            declared,
            actual,
        });
    }

    let (contents, checksum) = bytes.split_at(bytes.len() - 1);
    let sum = contents.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte));
    let computed = sum.wrapping_neg();
    if computed != checksum[0] {
        return Err(ImageError::ChecksumMismatch {
            line,
            found: checksum[0],
            computed,
        });
    }

    let kind_byte = bytes[3];
    let kind = RecordKind::from_u8(kind_byte).ok_or(ImageError::UnsupportedRecordType {
        line,
        kind: kind_byte,
    })?;
    if kind.fixed_len().is_some_and(|len| len != declared) {
        return Err(ImageError::InvalidRecordLength {
            line,
            kind: kind_byte,
            len: declared,
        });
    }

    Ok(Record {
        kind,
        offset: u16::from_be_bytes([bytes[1], bytes[2]]),
        data: bytes[4..4 + actual].to_vec(),
    })
}

const fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

fn be_u16(data: &[u8]) -> u16 {
    u16::from_be_bytes([data[0], data[1]])
}
