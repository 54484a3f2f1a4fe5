//! Reference page store.
//!
//! ## File layout
//!
//! ```text
//! page 0        static header: kind, checksum, magic "PGLG", version, page size
//! page 1        log header:    kind, checksum, log key, first trunk, first data page
//! page 2        free list 0, addressing ids [2, 2 + N)
//! page 2 + N    free list 1, addressing ids [2 + N, 2 + 2N)
//! ...
//! ```
//!
//! `N` is [`FreeSpaceBitmap::pages_addressed`]. Each free list marks its own
//! page used.
//!
//! Free lists live in memory and reach the backend only on
//! [`PageStore::write_back`]. Every change queues the list's before-image
//! for the transaction log (see [`LogStore::take_pending_undo`]), so callers
//! must flush the log before writing back.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use pagelog_codec::Row;
use pagelog_storage::{PageBackend, StorageError};
use tracing::debug;

use crate::bitset::BitField;
use crate::config::validate_page_size;
use crate::error::{CoreError, CoreResult};
use crate::page::{read_u32, update_checksum, verify_checksum, write_u32, FreeSpaceBitmap, Page};
use crate::store::redo::{MemoryTables, RedoTarget};
use crate::store::LogStore;
use crate::types::{PageId, TableId};

const STATIC_HEADER_PAGE: PageId = 0;
const LOG_HEADER_PAGE: PageId = 1;
const FIRST_FREE_LIST_PAGE: PageId = 2;

const STORE_MAGIC: [u8; 4] = *b"PGLG";
const FORMAT_VERSION: u16 = 1;

const KIND_STATIC_HEADER: u8 = 1;
const KIND_LOG_HEADER: u8 = 2;

const STATIC_HEADER_LEN: usize = 13;

/// Where the log starts, as persisted in page 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogHeader {
    /// Log key of the first trunk.
    pub log_key: u32,
    /// First trunk page, 0 if no log was ever opened.
    pub first_trunk: PageId,
    /// First data page to read.
    pub first_data: PageId,
}

impl LogHeader {
    fn encode(&self, page_size: usize) -> Vec<u8> {
        let mut data = vec![0u8; page_size];
        data[0] = KIND_LOG_HEADER;
        write_u32(&mut data, 3, self.log_key);
        write_u32(&mut data, 7, self.first_trunk);
        write_u32(&mut data, 11, self.first_data);
        update_checksum(LOG_HEADER_PAGE, &mut data);
        data
    }

    fn decode(data: &[u8]) -> CoreResult<Self> {
        if data[0] != KIND_LOG_HEADER {
            return Err(CoreError::invalid_format("page 1 is not a log header"));
        }
        verify_checksum(LOG_HEADER_PAGE, data)?;
        Ok(Self {
            log_key: read_u32(data, 3),
            first_trunk: read_u32(data, 7),
            first_data: read_u32(data, 11),
        })
    }
}

/// A page store over a [`PageBackend`], replaying redo into `R`.
pub struct PageStore<R: RedoTarget = MemoryTables> {
    backend: Box<dyn PageBackend>,
    page_size: usize,
    page_count: u32,
    free_lists: Vec<FreeSpaceBitmap>,
    dirty_free_lists: BTreeSet<usize>,
    pending_undo: Vec<(PageId, Vec<u8>)>,
    reserved_roots: BTreeMap<PageId, u32>,
    log_header: LogHeader,
    tables: R,
}

impl<R: RedoTarget> PageStore<R> {
    /// Initializes a new store on an empty backend.
    ///
    /// # Errors
    ///
    /// Fails if the backend already holds pages or its page size is not
    /// supported.
    pub fn create(backend: Box<dyn PageBackend>, tables: R) -> CoreResult<Self> {
        let page_size = backend.page_size();
        validate_page_size(page_size)?;
        if backend.page_count()? != 0 {
            return Err(CoreError::invalid_operation("backend is not empty"));
        }
        let mut store = Self::with_backend(backend, tables);
        let mut header = vec![0u8; page_size];
        header[0] = KIND_STATIC_HEADER;
        header[3..7].copy_from_slice(&STORE_MAGIC);
        header[7..9].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        write_u32(&mut header, 9, page_size as u32);
        update_checksum(STATIC_HEADER_PAGE, &mut header);
        store.backend.write_page(STATIC_HEADER_PAGE, &header)?;
        store
            .backend
            .write_page(LOG_HEADER_PAGE, &store.log_header.encode(page_size))?;
        store.page_count = FIRST_FREE_LIST_PAGE;
        store.ensure_free_list(0)?;
        store.pending_undo.clear();
        store.write_back()?;
        store.backend.flush()?;
        debug!(page_size, "page store created");
        Ok(store)
    }

    /// Opens an existing store.
    ///
    /// # Errors
    ///
    /// Fails if the headers are missing or invalid, or a free list page is
    /// corrupted.
    pub fn open(backend: Box<dyn PageBackend>, tables: R) -> CoreResult<Self> {
        let page_size = backend.page_size();
        validate_page_size(page_size)?;
        let backend_pages = backend.page_count()?;
        if backend_pages <= FIRST_FREE_LIST_PAGE {
            return Err(CoreError::invalid_format("store has no header pages"));
        }
        let mut store = Self::with_backend(backend, tables);
        store.page_count = backend_pages;
        check_static_header(&store.backend.read_page(STATIC_HEADER_PAGE)?, page_size)?;
        store.log_header = LogHeader::decode(&store.backend.read_page(LOG_HEADER_PAGE)?)?;

        let mut idx = 0;
        while let Some(id) = store.free_list_page_id(idx) {
            if id >= backend_pages {
                break;
            }
            match Page::decode(id, &store.backend.read_page(id)?)? {
                Page::FreeList(list) => store.free_lists.push(list),
                Page::Empty => {
                    store.ensure_free_list(idx)?;
                }
                other => {
                    return Err(CoreError::page_corrupted(
                        id,
                        format!("expected free list, found {}", other.kind_name()),
                    ))
                }
            }
            idx += 1;
        }
        if store.free_lists.is_empty() {
            store.ensure_free_list(0)?;
        }
        store.pending_undo.clear();
        if let Some(last) = store.last_used_page() {
            store.page_count = store.page_count.max(last + 1);
        }
        debug!(
            page_size,
            page_count = store.page_count,
            free_lists = store.free_lists.len(),
            "page store opened"
        );
        Ok(store)
    }

    fn with_backend(backend: Box<dyn PageBackend>, tables: R) -> Self {
        Self {
            page_size: backend.page_size(),
            backend,
            page_count: 0,
            free_lists: Vec::new(),
            dirty_free_lists: BTreeSet::new(),
            pending_undo: Vec::new(),
            reserved_roots: BTreeMap::new(),
            log_header: LogHeader::default(),
            tables,
        }
    }

    /// Allocates one page, never handing out an id in `exclude`.
    pub fn allocate_page(&mut self, exclude: &BitField) -> CoreResult<PageId> {
        let ids = self.allocate_pages(1, exclude, 0)?;
        ids.first()
            .copied()
            .ok_or_else(|| CoreError::internal("allocator returned no page"))
    }

    /// Writes changed free lists to the backend.
    ///
    /// The transaction log must be flushed first: it holds their undo images.
    pub fn write_back(&mut self) -> CoreResult<()> {
        for idx in std::mem::take(&mut self.dirty_free_lists) {
            let list = &self.free_lists[idx];
            self.backend.write_page(list.page_id(), &list.encode())?;
        }
        Ok(())
    }

    /// Writes back free lists, then syncs the backend.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.write_back()?;
        self.backend.sync()?;
        Ok(())
    }

    /// The persisted log header.
    pub fn log_header(&self) -> LogHeader {
        self.log_header
    }

    /// The redo target.
    pub fn tables(&self) -> &R {
        &self.tables
    }

    /// The redo target, mutably.
    pub fn tables_mut(&mut self) -> &mut R {
        &mut self.tables
    }

    /// Whether a page id is marked used. Header pages always are.
    pub fn is_used(&self, page_id: PageId) -> bool {
        if page_id < FIRST_FREE_LIST_PAGE {
            return true;
        }
        self.free_lists
            .get(self.free_list_index(page_id))
            .is_some_and(|list| list.is_used(page_id))
    }

    /// The lowest free page id in the loaded free lists.
    pub fn first_free_page(&self) -> Option<PageId> {
        self.free_lists.iter().find_map(FreeSpaceBitmap::first_free)
    }

    /// The highest used page id.
    pub fn last_used_page(&self) -> Option<PageId> {
        self.free_lists.iter().rev().find_map(FreeSpaceBitmap::last_used)
    }

    /// Number of free list pages.
    pub fn free_list_count(&self) -> usize {
        self.free_lists.len()
    }

    /// Index root pages reserved during recovery, with the log position of
    /// the row that named them.
    pub fn reserved_index_roots(&self) -> &BTreeMap<PageId, u32> {
        &self.reserved_roots
    }

    fn pages_per_list(&self) -> usize {
        FreeSpaceBitmap::pages_addressed(self.page_size)
    }

    fn free_list_index(&self, page_id: PageId) -> usize {
        page_id.saturating_sub(FIRST_FREE_LIST_PAGE) as usize / self.pages_per_list()
    }

    fn free_list_page_id(&self, idx: usize) -> Option<PageId> {
        idx.checked_mul(self.pages_per_list())
            .and_then(|offset| PageId::try_from(offset).ok())
            .and_then(|offset| offset.checked_add(FIRST_FREE_LIST_PAGE))
    }

    fn ensure_free_list(&mut self, idx: usize) -> CoreResult<()> {
        while self.free_lists.len() <= idx {
            let id = self
                .free_list_page_id(self.free_lists.len())
                .ok_or_else(|| CoreError::internal("page id space exhausted"))?;
            self.pending_undo.push((id, vec![0; self.page_size]));
            let mut list = FreeSpaceBitmap::new(id, self.page_size);
            list.allocate_at(id)?;
            self.dirty_free_lists.insert(self.free_lists.len());
            self.free_lists.push(list);
            self.page_count = self.page_count.max(id + 1);
        }
        Ok(())
    }

    fn free_list_for(&mut self, page_id: PageId) -> CoreResult<usize> {
        if page_id < FIRST_FREE_LIST_PAGE {
            return Err(CoreError::internal(format!(
                "page {page_id} is a header page"
            )));
        }
        let idx = self.free_list_index(page_id);
        self.ensure_free_list(idx)?;
        self.pending_undo
            .push((self.free_lists[idx].page_id(), self.free_lists[idx].encode()));
        self.dirty_free_lists.insert(idx);
        Ok(idx)
    }

    fn reload_free_list(&mut self, page_id: PageId, data: &[u8]) {
        if page_id < FIRST_FREE_LIST_PAGE {
            return;
        }
        let idx = self.free_list_index(page_id);
        if self.free_list_page_id(idx) != Some(page_id) || idx >= self.free_lists.len() {
            return;
        }
        match Page::decode(page_id, data) {
            Ok(Page::FreeList(list)) => {
                self.free_lists[idx] = list;
            }
            Ok(Page::Empty) if idx + 1 == self.free_lists.len() && idx > 0 => {
                self.free_lists.pop();
            }
            _ => return,
        }
        self.dirty_free_lists.remove(&idx);
    }
}

impl<R: RedoTarget> LogStore for PageStore<R> {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn read_page(&self, page_id: PageId) -> CoreResult<Vec<u8>> {
        if page_id >= self.page_count {
            return Err(StorageError::PageOutOfRange {
                page_id,
                page_count: self.page_count,
            }
            .into());
        }
        if page_id >= self.backend.page_count()? {
            return Ok(vec![0; self.page_size]);
        }
        Ok(self.backend.read_page(page_id)?)
    }

    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> CoreResult<()> {
        if data.len() != self.page_size {
            return Err(StorageError::PageSizeMismatch {
                expected: self.page_size,
                actual: data.len(),
            }
            .into());
        }
        self.backend.write_page(page_id, data)?;
        self.page_count = self.page_count.max(page_id + 1);
        self.reload_free_list(page_id, data);
        Ok(())
    }

    fn allocate_pages(
        &mut self,
        count: usize,
        exclude: &BitField,
        first_hint: PageId,
    ) -> CoreResult<Vec<PageId>> {
        let mut ids = Vec::with_capacity(count);
        let mut touched = BTreeSet::new();
        let mut idx = self.free_list_index(first_hint.max(FIRST_FREE_LIST_PAGE));
        while ids.len() < count {
            self.ensure_free_list(idx)?;
            if touched.insert(idx) {
                self.pending_undo
                    .push((self.free_lists[idx].page_id(), self.free_lists[idx].encode()));
            }
            match self.free_lists[idx].allocate(exclude, first_hint) {
                Some(id) => {
                    self.dirty_free_lists.insert(idx);
                    self.page_count = self.page_count.max(id + 1);
                    ids.push(id);
                }
                None => idx += 1,
            }
        }
        Ok(ids)
    }

    fn allocate_page_at(&mut self, page_id: PageId) -> CoreResult<()> {
        let idx = self.free_list_for(page_id)?;
        self.free_lists[idx].allocate_at(page_id)?;
        self.page_count = self.page_count.max(page_id + 1);
        Ok(())
    }

    fn free_page(&mut self, page_id: PageId) -> CoreResult<()> {
        let idx = self.free_list_for(page_id)?;
        if self.free_lists[idx].page_id() == page_id {
            return Err(CoreError::internal(format!(
                "page {page_id} holds a free list"
            )));
        }
        self.free_lists[idx].free(page_id)
    }

    fn take_pending_undo(&mut self) -> Vec<(PageId, Vec<u8>)> {
        std::mem::take(&mut self.pending_undo)
    }

    fn allocate_if_index_root(&mut self, pos: u32, table: TableId, row: &Row) -> CoreResult<()> {
        if let Some(root) = self.tables.index_root_page(table, row) {
            debug!(root, pos, "reserving index root page");
            self.reserved_roots.insert(root, pos);
            self.allocate_page_at(root)?;
        }
        Ok(())
    }

    fn redo(&mut self, table: TableId, row: Row, add: bool) -> CoreResult<()> {
        if add {
            self.tables.redo_add(table, row)
        } else {
            self.tables.redo_remove(table, row.key())
        }
    }

    fn redo_delete(&mut self, table: TableId, key: i64) -> CoreResult<()> {
        self.tables.redo_remove(table, key)
    }

    fn redo_truncate(&mut self, table: TableId) -> CoreResult<()> {
        self.tables.redo_truncate(table)
    }

    fn set_log_first_page(
        &mut self,
        log_key: u32,
        first_trunk: PageId,
        first_data: PageId,
    ) -> CoreResult<()> {
        self.log_header = LogHeader {
            log_key,
            first_trunk,
            first_data,
        };
        debug!(log_key, first_trunk, first_data, "log header updated");
        self.backend
            .write_page(LOG_HEADER_PAGE, &self.log_header.encode(self.page_size))?;
        Ok(())
    }

    fn flush(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        Ok(())
    }
}

impl PageStore<MemoryTables> {
    /// Creates a store over an [`pagelog_storage::InMemoryPageBackend`].
    pub fn in_memory(config: &crate::config::StoreConfig) -> CoreResult<Self> {
        config.validate()?;
        Self::create(
            Box::new(pagelog_storage::InMemoryPageBackend::new(config.page_size)),
            MemoryTables::new(),
        )
    }
}

/// Reads the page size recorded in a store file's static header.
pub fn probe_page_size(path: &Path) -> CoreResult<usize> {
    let mut header = [0u8; STATIC_HEADER_LEN];
    File::open(path)?.read_exact(&mut header)?;
    if header[0] != KIND_STATIC_HEADER || header[3..7] != STORE_MAGIC {
        return Err(CoreError::invalid_format("not a pagelog store"));
    }
    let page_size = read_u32(&header, 9) as usize;
    validate_page_size(page_size)?;
    Ok(page_size)
}

fn check_static_header(data: &[u8], page_size: usize) -> CoreResult<()> {
    if data[0] != KIND_STATIC_HEADER || data[3..7] != STORE_MAGIC {
        return Err(CoreError::invalid_format("bad magic"));
    }
    verify_checksum(STATIC_HEADER_PAGE, data)?;
    let version = u16::from_le_bytes([data[7], data[8]]);
    if version != FORMAT_VERSION {
        return Err(CoreError::invalid_format(format!(
            "unsupported format version {version}"
        )));
    }
    let stored = read_u32(data, 9) as usize;
    if stored != page_size {
        return Err(CoreError::invalid_format(format!(
            "store has page size {stored}, backend uses {page_size}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use pagelog_codec::Value;
    use pagelog_storage::InMemoryPageBackend;

    fn store() -> PageStore {
        PageStore::in_memory(&StoreConfig::new().page_size(64)).unwrap()
    }

    #[test]
    fn create_layout() {
        let store = store();
        assert_eq!(store.page_count(), 3);
        assert!(store.is_used(0));
        assert!(store.is_used(1));
        assert!(store.is_used(2));
        assert_eq!(store.first_free_page(), Some(3));
        assert_eq!(store.log_header(), LogHeader::default());
        assert_eq!(store.free_list_count(), 1);
    }

    #[test]
    fn allocate_and_free() {
        let mut store = store();
        let a = store.allocate_page(&BitField::new()).unwrap();
        let b = store.allocate_page(&BitField::new()).unwrap();
        assert_eq!((a, b), (3, 4));
        assert_eq!(store.page_count(), 5);
        store.free_page(a).unwrap();
        assert_eq!(store.allocate_page(&BitField::new()).unwrap(), a);
        let exclude: BitField = [5].into_iter().collect();
        assert_eq!(store.allocate_page(&exclude).unwrap(), 6);
    }

    #[test]
    fn allocation_queues_before_image() {
        let mut store = store();
        store.take_pending_undo();
        let before = store.read_page(2).unwrap();
        store.allocate_pages(3, &BitField::new(), 0).unwrap();
        let pending = store.take_pending_undo();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, 2);
        assert_eq!(pending[0].1, before);
        assert!(store.take_pending_undo().is_empty());
    }

    #[test]
    fn header_pages_cannot_be_freed() {
        let mut store = store();
        assert!(store.free_page(1).is_err());
        assert!(store.free_page(2).is_err());
    }

    #[test]
    fn second_free_list_is_created_on_demand() {
        let mut store = store();
        let per_list = FreeSpaceBitmap::pages_addressed(64);
        let ids = store.allocate_pages(per_list, &BitField::new(), 0).unwrap();
        assert_eq!(store.free_list_count(), 2);
        let second = 2 + per_list as PageId;
        assert!(!ids.contains(&second));
        assert!(store.is_used(second));
    }

    #[test]
    fn unwritten_pages_read_as_zero() {
        let mut store = store();
        let id = store.allocate_page(&BitField::new()).unwrap();
        assert_eq!(store.read_page(id).unwrap(), vec![0; 64]);
        assert!(matches!(
            store.read_page(id + 1),
            Err(CoreError::Storage(StorageError::PageOutOfRange { .. }))
        ));
    }

    #[test]
    fn writing_a_free_list_image_reloads_it() {
        let mut store = store();
        let image = store.read_page(2).unwrap();
        let id = store.allocate_page(&BitField::new()).unwrap();
        assert!(store.is_used(id));
        store.write_page(2, &image).unwrap();
        assert!(!store.is_used(id));
    }

    #[test]
    fn reopen_after_write_back() {
        let backend = InMemoryPageBackend::new(64);
        let mut store = PageStore::create(Box::new(backend), MemoryTables::new()).unwrap();
        let id = store.allocate_page(&BitField::new()).unwrap();
        store.set_log_first_page(3, id, 0).unwrap();
        store.sync().unwrap();
        let data = store_bytes(&store);

        let reopened = PageStore::open(
            Box::new(InMemoryPageBackend::with_data(64, data)),
            MemoryTables::new(),
        )
        .unwrap();
        assert!(reopened.is_used(id));
        assert_eq!(reopened.log_header().first_trunk, id);
        assert_eq!(reopened.log_header().log_key, 3);
    }

    #[test]
    fn open_rejects_foreign_data() {
        let backend = InMemoryPageBackend::with_data(64, vec![0x55; 64 * 4]);
        assert!(PageStore::open(Box::new(backend), MemoryTables::new()).is_err());
        let empty = InMemoryPageBackend::new(64);
        assert!(PageStore::open(Box::new(empty), MemoryTables::new()).is_err());
    }

    #[test]
    fn index_root_is_reserved() {
        let mut store = store();
        let row = Row::new(
            1,
            vec![Value::Int(1), Value::from("t"), Value::Int(0), Value::Int(9)],
        );
        store
            .allocate_if_index_root(4, crate::store::META_TABLE, &row)
            .unwrap();
        assert!(store.is_used(9));
        assert_eq!(store.reserved_index_roots().get(&9), Some(&4));
    }

    #[test]
    fn probe_reads_page_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.pglg");
        {
            let backend = pagelog_storage::FilePageBackend::open(&path, 128).unwrap();
            let mut store = PageStore::create(Box::new(backend), MemoryTables::new()).unwrap();
            store.sync().unwrap();
        }
        assert_eq!(probe_page_size(&path).unwrap(), 128);
    }

    fn store_bytes(store: &PageStore) -> Vec<u8> {
        let mut data = Vec::new();
        for id in 0..store.backend.page_count().unwrap() {
            data.extend(store.backend.read_page(id).unwrap());
        }
        data
    }
}
