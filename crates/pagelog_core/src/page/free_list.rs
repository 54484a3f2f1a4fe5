//! Free-space bitmap pages.
//!
//! ```text
//! | kind (1) | checksum (2) | bits ... (LSB-first, 8 page ids per byte) |
//! ```
//!
//! A bitmap page addresses the contiguous run of page ids starting at its
//! own id. A set bit means the page is in use.

use crate::bitset::BitField;
use crate::error::{CoreError, CoreResult};
use crate::page::{update_checksum, PageKind, PAGE_HEADER_SIZE};
use crate::types::PageId;

/// One page worth of allocation bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeSpaceBitmap {
    page_id: PageId,
    page_size: usize,
    pages_addressed: usize,
    used: BitField,
    full: bool,
}

impl FreeSpaceBitmap {
    /// Number of page ids one bitmap page addresses.
    pub const fn pages_addressed(page_size: usize) -> usize {
        (page_size - PAGE_HEADER_SIZE) * 8
    }

    /// Creates an all-free bitmap stored at `page_id`, addressing the run
    /// that starts at `page_id`.
    ///
    /// The bitmap does not mark its own page; the owning store does.
    pub fn new(page_id: PageId, page_size: usize) -> Self {
        Self {
            page_id,
            page_size,
            pages_addressed: Self::pages_addressed(page_size),
            used: BitField::new(),
            full: false,
        }
    }

    /// Creates a bitmap that addresses only `limit` page ids.
    #[cfg(test)]
    pub(crate) fn with_limit(page_id: PageId, page_size: usize, limit: usize) -> Self {
        let mut bitmap = Self::new(page_id, page_size);
        bitmap.pages_addressed = limit.min(bitmap.pages_addressed);
        bitmap
    }

    /// Decodes a bitmap page read from `page_id`.
    pub fn decode(page_id: PageId, data: &[u8]) -> CoreResult<Self> {
        if data.len() <= PAGE_HEADER_SIZE || data[0] != PageKind::FreeList.as_byte() {
            return Err(CoreError::page_corrupted(page_id, "not a free-list page"));
        }
        let mut bitmap = Self::new(page_id, data.len());
        for (i, &b) in data[PAGE_HEADER_SIZE..].iter().enumerate() {
            bitmap.used.set_byte(i, b);
        }
        Ok(bitmap)
    }

    /// Encodes the page, checksum included.
    pub fn encode(&self) -> Vec<u8> {
        let mut data = vec![0u8; self.page_size];
        data[0] = PageKind::FreeList.as_byte();
        for (i, b) in data[PAGE_HEADER_SIZE..].iter_mut().enumerate() {
            *b = self.used.get_byte(i);
        }
        update_checksum(self.page_id, &mut data);
        data
    }

    /// The page this bitmap is stored at (and the first id it addresses).
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Whether `page_id` falls inside the run this bitmap addresses.
    pub fn covers(&self, page_id: PageId) -> bool {
        page_id >= self.page_id && ((page_id - self.page_id) as usize) < self.pages_addressed
    }

    /// Allocates the lowest free page id at or after `first_hint` that is
    /// not in `exclude`, marking it used.
    ///
    /// Returns `None` if there is none. `full` is cached only when the whole
    /// run was scanned and nothing was skipped for being excluded.
    pub fn allocate(&mut self, exclude: &BitField, first_hint: PageId) -> Option<PageId> {
        if self.full {
            return None;
        }
        let start = first_hint.saturating_sub(self.page_id) as usize;
        let mut skipped = false;
        let mut i = self.used.next_clear_bit(start);
        while i < self.pages_addressed {
            let page_id = self.page_id + i as PageId;
            if exclude.get(page_id as usize) {
                skipped = true;
                i = self.used.next_clear_bit(i + 1);
                continue;
            }
            self.used.set(i);
            return Some(page_id);
        }
        if start == 0 && !skipped {
            self.full = true;
        }
        None
    }

    /// Marks a specific page id used. Idempotent.
    pub fn allocate_at(&mut self, page_id: PageId) -> CoreResult<PageId> {
        let i = self.index_of(page_id)?;
        self.used.set(i);
        Ok(page_id)
    }

    /// Marks a page id free.
    pub fn free(&mut self, page_id: PageId) -> CoreResult<()> {
        let i = self.index_of(page_id)?;
        self.used.clear(i);
        self.full = false;
        Ok(())
    }

    /// Whether `page_id` is marked used.
    pub fn is_used(&self, page_id: PageId) -> bool {
        self.index_of(page_id)
            .map(|i| self.used.get(i))
            .unwrap_or(false)
    }

    /// The lowest free page id, if any.
    pub fn first_free(&self) -> Option<PageId> {
        let i = self.used.next_clear_bit(0);
        (i < self.pages_addressed).then(|| self.page_id + i as PageId)
    }

    /// The highest used page id, if any.
    pub fn last_used(&self) -> Option<PageId> {
        match self.used.length() {
            0 => None,
            len => Some(self.page_id + (len - 1) as PageId),
        }
    }

    /// Number of used page ids.
    pub fn used_count(&self) -> usize {
        self.used.count_ones()
    }

    fn index_of(&self, page_id: PageId) -> CoreResult<usize> {
        if !self.covers(page_id) {
            return Err(CoreError::internal(format!(
                "page {page_id} is outside free list {}",
                self.page_id
            )));
        }
        Ok((page_id - self.page_id) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Page;
    use proptest::prelude::*;

    #[test]
    fn pages_addressed_formula() {
        assert_eq!(FreeSpaceBitmap::pages_addressed(64), 488);
        assert_eq!(FreeSpaceBitmap::pages_addressed(4096), 32_744);
    }

    #[test]
    fn freed_page_is_reused_around_exclusion() {
        let mut bitmap = FreeSpaceBitmap::with_limit(0, 64, 16);
        for expected in 0..10 {
            assert_eq!(bitmap.allocate(&BitField::new(), 0), Some(expected));
        }
        bitmap.free(3).unwrap();
        let exclude: BitField = [4].into_iter().collect();
        assert_eq!(bitmap.allocate(&exclude, 0), Some(3));
    }

    #[test]
    fn exclusion_skips_free_ids() {
        let mut bitmap = FreeSpaceBitmap::with_limit(0, 64, 16);
        let exclude: BitField = [0, 1].into_iter().collect();
        assert_eq!(bitmap.allocate(&exclude, 0), Some(2));
        assert!(!bitmap.is_used(0));
    }

    #[test]
    fn full_is_cached_and_cleared_by_free() {
        let mut bitmap = FreeSpaceBitmap::with_limit(0, 64, 4);
        for _ in 0..4 {
            assert!(bitmap.allocate(&BitField::new(), 0).is_some());
        }
        assert_eq!(bitmap.allocate(&BitField::new(), 0), None);
        assert!(bitmap.full);
        bitmap.free(2).unwrap();
        assert!(!bitmap.full);
        assert_eq!(bitmap.allocate(&BitField::new(), 0), Some(2));
    }

    #[test]
    fn hinted_scan_does_not_cache_full() {
        let mut bitmap = FreeSpaceBitmap::with_limit(0, 64, 4);
        bitmap.allocate_at(2).unwrap();
        bitmap.allocate_at(3).unwrap();
        assert_eq!(bitmap.allocate(&BitField::new(), 2), None);
        assert!(!bitmap.full);
        assert_eq!(bitmap.allocate(&BitField::new(), 0), Some(0));
    }

    #[test]
    fn base_offset_and_hint() {
        let mut bitmap = FreeSpaceBitmap::new(100, 64);
        assert_eq!(bitmap.allocate(&BitField::new(), 0), Some(100));
        assert_eq!(bitmap.allocate(&BitField::new(), 110), Some(110));
        assert!(bitmap.is_used(110));
        assert!(!bitmap.is_used(99));
        assert!(bitmap.allocate_at(99).is_err());
    }

    #[test]
    fn first_free_and_last_used() {
        let mut bitmap = FreeSpaceBitmap::new(2, 64);
        assert_eq!(bitmap.first_free(), Some(2));
        assert_eq!(bitmap.last_used(), None);
        bitmap.allocate_at(2).unwrap();
        bitmap.allocate_at(40).unwrap();
        assert_eq!(bitmap.first_free(), Some(3));
        assert_eq!(bitmap.last_used(), Some(40));
        assert_eq!(bitmap.used_count(), 2);
    }

    #[test]
    fn encode_decode() {
        let mut bitmap = FreeSpaceBitmap::new(2, 64);
        bitmap.allocate_at(2).unwrap();
        bitmap.allocate_at(11).unwrap();
        let bytes = bitmap.encode();
        assert_eq!(bytes[0], PageKind::FreeList.as_byte());
        assert_eq!(bytes[3], 0b0000_0001);
        assert_eq!(bytes[4], 0b0000_0010);
        match Page::decode(2, &bytes).unwrap() {
            Page::FreeList(decoded) => assert_eq!(decoded, bitmap),
            other => panic!("unexpected page {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn allocate_respects_used_and_excluded(
            used in proptest::collection::vec(0u32..64, 0..40),
            excluded in proptest::collection::vec(0usize..64, 0..20),
        ) {
            let mut bitmap = FreeSpaceBitmap::with_limit(0, 64, 64);
            for &id in &used {
                bitmap.allocate_at(id).unwrap();
            }
            let before = bitmap.clone();
            let exclude: BitField = excluded.iter().copied().collect();
            if let Some(id) = bitmap.allocate(&exclude, 0) {
                prop_assert!(!exclude.get(id as usize));
                prop_assert!(!before.is_used(id));
                prop_assert!(bitmap.is_used(id));
            } else {
                prop_assert!((0..64u32).all(|id| before.is_used(id) || exclude.get(id as usize)));
            }
        }
    }
}
