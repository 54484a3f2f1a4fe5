//! Log stream trunk pages and the trunk chain iterator.
//!
//! ```text
//! | kind (1) | checksum (2) | parent (4) | log key (4) | next trunk (4) |
//! | count (2) | data page ids (4 × count) |
//! ```

use crate::bitset::BitField;
use crate::error::{CoreError, CoreResult};
use crate::page::{read_u32, update_checksum, write_u32, Page, PageKind};
use crate::store::LogStore;
use crate::types::PageId;

const PARENT_OFFSET: usize = 3;
const KEY_OFFSET: usize = 7;
const NEXT_OFFSET: usize = 11;
const COUNT_OFFSET: usize = 15;
const DATA_START: usize = 17;

/// A trunk page: one link of the log stream's chain, listing the data pages
/// it owns in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogStreamTrunk {
    page_id: PageId,
    parent: PageId,
    log_key: u32,
    next_trunk: PageId,
    page_ids: Vec<PageId>,
}

impl LogStreamTrunk {
    /// Number of data page ids one trunk holds.
    pub const fn pages_addressed(page_size: usize) -> usize {
        (page_size - DATA_START) / 4
    }

    /// Creates a trunk.
    pub fn new(
        page_id: PageId,
        parent: PageId,
        log_key: u32,
        next_trunk: PageId,
        page_ids: Vec<PageId>,
    ) -> Self {
        Self {
            page_id,
            parent,
            log_key,
            next_trunk,
            page_ids,
        }
    }

    /// Decodes a trunk page read from `page_id`.
    pub fn decode(page_id: PageId, data: &[u8]) -> CoreResult<Self> {
        if data.len() < DATA_START || data[0] != PageKind::StreamTrunk.as_byte() {
            return Err(CoreError::page_corrupted(page_id, "not a stream trunk page"));
        }
        let count = u16::from_le_bytes([data[COUNT_OFFSET], data[COUNT_OFFSET + 1]]) as usize;
        if count > Self::pages_addressed(data.len()) {
            return Err(CoreError::page_corrupted(
                page_id,
                format!("trunk lists {count} data pages"),
            ));
        }
        let page_ids = (0..count)
            .map(|i| read_u32(data, DATA_START + i * 4))
            .collect();
        Ok(Self {
            page_id,
            parent: read_u32(data, PARENT_OFFSET),
            log_key: read_u32(data, KEY_OFFSET),
            next_trunk: read_u32(data, NEXT_OFFSET),
            page_ids,
        })
    }

    /// Encodes the page, checksum included.
    pub fn encode(&self, page_size: usize) -> CoreResult<Vec<u8>> {
        if self.page_ids.len() > Self::pages_addressed(page_size) {
            return Err(CoreError::internal(format!(
                "trunk {} cannot hold {} data pages",
                self.page_id,
                self.page_ids.len()
            )));
        }
        let mut data = vec![0u8; page_size];
        data[0] = PageKind::StreamTrunk.as_byte();
        write_u32(&mut data, PARENT_OFFSET, self.parent);
        write_u32(&mut data, KEY_OFFSET, self.log_key);
        write_u32(&mut data, NEXT_OFFSET, self.next_trunk);
        data[COUNT_OFFSET..DATA_START].copy_from_slice(&(self.page_ids.len() as u16).to_le_bytes());
        for (i, &id) in self.page_ids.iter().enumerate() {
            write_u32(&mut data, DATA_START + i * 4, id);
        }
        update_checksum(self.page_id, &mut data);
        Ok(data)
    }

    /// This page's id.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// The previous trunk in the chain (0 for the first one written).
    pub fn parent(&self) -> PageId {
        self.parent
    }

    /// The log key stamped on this trunk and its data pages.
    pub fn log_key(&self) -> u32 {
        self.log_key
    }

    /// The page reserved for the next trunk.
    pub fn next_trunk(&self) -> PageId {
        self.next_trunk
    }

    /// Data page ids, in stream order.
    pub fn page_ids(&self) -> &[PageId] {
        &self.page_ids
    }

    /// The `i`-th data page id.
    pub fn data_page(&self, i: usize) -> Option<PageId> {
        self.page_ids.get(i).copied()
    }

    /// Whether this trunk owns `data_page`.
    pub fn contains(&self, data_page: PageId) -> bool {
        self.page_ids.contains(&data_page)
    }
}

/// Walks a trunk chain from its first page.
///
/// Iteration stops at a zero or out-of-range link, a page that is not a
/// trunk, a trunk whose parent is not the previous trunk, a page that fails
/// its checksum, or a trunk already visited.
#[derive(Debug)]
pub struct TrunkIterator {
    next: PageId,
    previous: PageId,
    current: PageId,
    can_delete: bool,
    visited: BitField,
}

impl TrunkIterator {
    /// Starts a walk at `first`.
    pub fn new(first: PageId) -> Self {
        Self {
            next: first,
            previous: 0,
            current: 0,
            can_delete: false,
            visited: BitField::new(),
        }
    }

    /// Reads the next trunk, or `None` at the end of the chain.
    ///
    /// # Errors
    ///
    /// Storage errors propagate; corruption ends the chain.
    pub fn next(&mut self, store: &dyn LogStore) -> CoreResult<Option<LogStreamTrunk>> {
        self.can_delete = false;
        let id = self.next;
        if id == 0 || id >= store.page_count() || self.visited.get(id as usize) {
            return Ok(None);
        }
        self.visited.set(id as usize);
        self.current = id;
        let page = match Page::decode(id, &store.read_page(id)?) {
            Ok(page) => page,
            Err(CoreError::PageCorrupted { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        self.can_delete = matches!(page, Page::Empty) || page.is_stream();
        let Page::Trunk(trunk) = page else {
            return Ok(None);
        };
        if self.previous != 0 && trunk.parent() != self.previous {
            return Ok(None);
        }
        self.previous = id;
        self.next = trunk.next_trunk();
        Ok(Some(trunk))
    }

    /// Whether the page last visited may be released: it is empty or belongs
    /// to some log stream.
    pub fn can_delete(&self) -> bool {
        self.can_delete
    }

    /// The page id last visited.
    pub fn current_page_id(&self) -> PageId {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_addressed_formula() {
        assert_eq!(LogStreamTrunk::pages_addressed(64), 11);
        assert_eq!(LogStreamTrunk::pages_addressed(4096), 1019);
    }

    #[test]
    fn encode_decode() {
        let trunk = LogStreamTrunk::new(10, 4, 3, 22, vec![11, 12, 13]);
        let bytes = trunk.encode(64).unwrap();
        let Page::Trunk(decoded) = Page::decode(10, &bytes).unwrap() else {
            panic!("expected trunk page");
        };
        assert_eq!(decoded, trunk);
        assert!(decoded.contains(12));
        assert!(!decoded.contains(22));
        assert_eq!(decoded.data_page(2), Some(13));
        assert_eq!(decoded.data_page(3), None);
    }

    #[test]
    fn too_many_ids() {
        let trunk = LogStreamTrunk::new(10, 0, 1, 0, (0..12).collect());
        assert!(trunk.encode(64).is_err());
    }

    #[test]
    fn impossible_count_is_corruption() {
        let mut bytes = LogStreamTrunk::new(10, 0, 1, 0, vec![]).encode(64).unwrap();
        bytes[COUNT_OFFSET] = 200;
        update_checksum(10, &mut bytes);
        assert!(matches!(
            Page::decode(10, &bytes),
            Err(CoreError::PageCorrupted { .. })
        ));
    }
}
