//! Page kinds and the page checksum.
//!
//! Every page starts with a one-byte kind tag followed by a 16-bit checksum:
//!
//! ```text
//! | kind (1) | checksum (2, LE) | body ... |
//! ```
//!
//! The checksum is a CRC-32 over the page id, the kind byte and the body,
//! folded to 16 bits. Mixing in the page id means a page copied to the wrong
//! place fails verification just like a torn one.

mod data;
mod free_list;
mod trunk;

pub use data::LogStreamData;
pub use free_list::FreeSpaceBitmap;
pub use trunk::{LogStreamTrunk, TrunkIterator};

use crate::error::{CoreError, CoreResult};
use crate::types::PageId;

/// Byte offset of the checksum field.
const CHECKSUM_OFFSET: usize = 1;

/// Size of the common page header (kind + checksum).
pub(crate) const PAGE_HEADER_SIZE: usize = 3;

/// Page kind tags understood by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageKind {
    /// Never written, or wiped.
    Empty = 0,
    /// Free-space bitmap.
    FreeList = 6,
    /// Log stream trunk.
    StreamTrunk = 7,
    /// Log stream data.
    StreamData = 8,
}

impl PageKind {
    /// Converts a byte to a page kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Empty),
            6 => Some(Self::FreeList),
            7 => Some(Self::StreamTrunk),
            8 => Some(Self::StreamData),
            _ => None,
        }
    }

    /// Converts the page kind to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded page.
///
/// The set of kinds is closed: anything this crate does not own is
/// [`Page::Other`] and is passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    /// An empty page (kind byte 0).
    Empty,
    /// A free-space bitmap page.
    FreeList(FreeSpaceBitmap),
    /// A log stream trunk page.
    Trunk(LogStreamTrunk),
    /// A log stream data page.
    Data(LogStreamData),
    /// A page owned by a layer above this crate, with its kind byte.
    Other(u8),
}

impl Page {
    /// Decodes the page stored at `page_id`.
    ///
    /// Pages of a known kind must pass their checksum.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageCorrupted`] on a checksum mismatch or a
    /// malformed body.
    pub fn decode(page_id: PageId, data: &[u8]) -> CoreResult<Page> {
        let Some(&kind) = data.first() else {
            return Err(CoreError::page_corrupted(page_id, "empty buffer"));
        };
        match PageKind::from_byte(kind) {
            Some(PageKind::Empty) => Ok(Page::Empty),
            Some(PageKind::FreeList) => {
                verify_checksum(page_id, data)?;
                Ok(Page::FreeList(FreeSpaceBitmap::decode(page_id, data)?))
            }
            Some(PageKind::StreamTrunk) => {
                verify_checksum(page_id, data)?;
                Ok(Page::Trunk(LogStreamTrunk::decode(page_id, data)?))
            }
            Some(PageKind::StreamData) => {
                verify_checksum(page_id, data)?;
                Ok(Page::Data(LogStreamData::decode(page_id, data)?))
            }
            None => Ok(Page::Other(kind)),
        }
    }

    /// Human-readable kind name.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Page::Empty => "empty",
            Page::FreeList(_) => "free-list",
            Page::Trunk(_) => "stream-trunk",
            Page::Data(_) => "stream-data",
            Page::Other(_) => "other",
        }
    }

    /// Returns true for log stream pages.
    pub fn is_stream(&self) -> bool {
        matches!(self, Page::Trunk(_) | Page::Data(_))
    }
}

/// Computes the folded checksum of `data` as stored at `page_id`.
pub fn compute_checksum(page_id: PageId, data: &[u8]) -> u16 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page_id.to_le_bytes());
    hasher.update(&data[..CHECKSUM_OFFSET]);
    if data.len() > PAGE_HEADER_SIZE {
        hasher.update(&data[PAGE_HEADER_SIZE..]);
    }
    let crc = hasher.finalize();
    (crc ^ (crc >> 16)) as u16
}

/// Writes the checksum field of `data`.
pub fn update_checksum(page_id: PageId, data: &mut [u8]) {
    let checksum = compute_checksum(page_id, data);
    data[CHECKSUM_OFFSET..PAGE_HEADER_SIZE].copy_from_slice(&checksum.to_le_bytes());
}

/// Verifies the checksum field of `data`.
pub fn verify_checksum(page_id: PageId, data: &[u8]) -> CoreResult<()> {
    if data.len() < PAGE_HEADER_SIZE {
        return Err(CoreError::page_corrupted(page_id, "page shorter than header"));
    }
    let stored = u16::from_le_bytes([data[CHECKSUM_OFFSET], data[CHECKSUM_OFFSET + 1]]);
    let actual = compute_checksum(page_id, data);
    if stored != actual {
        return Err(CoreError::page_corrupted(
            page_id,
            format!("checksum mismatch: stored {stored:04x}, computed {actual:04x}"),
        ));
    }
    Ok(())
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

pub(crate) fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
