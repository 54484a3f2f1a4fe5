//! The store the transaction log runs against.
//!
//! [`LogStore`] is everything the log needs from its owner: raw page I/O,
//! page allocation, the redo hooks and the persisted log header.
//! [`PageStore`] is the reference implementation over a
//! [`pagelog_storage::PageBackend`].

mod page_store;
mod redo;

pub use page_store::{probe_page_size, LogHeader, PageStore};
pub use redo::{MemoryTables, RedoTarget, META_TABLE};

use pagelog_codec::Row;

use crate::bitset::BitField;
use crate::error::{CoreError, CoreResult};
use crate::types::{PageId, TableId};

/// The page store as seen by the transaction log.
pub trait LogStore {
    /// Page size in bytes.
    fn page_size(&self) -> usize;

    /// Number of page ids in use by the file, allocated or not yet written.
    fn page_count(&self) -> u32;

    /// Reads a full page.
    fn read_page(&self, page_id: PageId) -> CoreResult<Vec<u8>>;

    /// Writes a full page.
    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> CoreResult<()>;

    /// Allocates `count` pages, skipping ids in `exclude` and preferring ids
    /// at or after `first_hint`.
    fn allocate_pages(
        &mut self,
        count: usize,
        exclude: &BitField,
        first_hint: PageId,
    ) -> CoreResult<Vec<PageId>>;

    /// Marks a specific page id used.
    fn allocate_page_at(&mut self, page_id: PageId) -> CoreResult<()>;

    /// Returns a page id to the free pool.
    fn free_page(&mut self, page_id: PageId) -> CoreResult<()>;

    /// Takes the pre-images of allocator pages changed since the last call.
    ///
    /// The allocator mutates its own pages while the log is appending, so it
    /// queues their before-images here instead of calling back into the log.
    fn take_pending_undo(&mut self) -> Vec<(PageId, Vec<u8>)>;

    /// Reserves the index root page named by a meta-table row, so recovery
    /// never hands it out.
    fn allocate_if_index_root(&mut self, pos: u32, table: TableId, row: &Row) -> CoreResult<()>;

    /// Re-applies a committed row insert (`add`) or delete.
    fn redo(&mut self, table: TableId, row: Row, add: bool) -> CoreResult<()>;

    /// Re-applies a committed delete by key.
    fn redo_delete(&mut self, table: TableId, key: i64) -> CoreResult<()>;

    /// Re-applies a committed truncate.
    fn redo_truncate(&mut self, table: TableId) -> CoreResult<()>;

    /// Compresses a page image.
    fn compress(&self, data: &[u8]) -> Vec<u8> {
        lz4_flex::block::compress(data)
    }

    /// Expands a compressed page image to exactly `len` bytes.
    fn expand(&self, data: &[u8], len: usize) -> CoreResult<Vec<u8>> {
        let page = lz4_flex::block::decompress(data, len)
            .map_err(|e| CoreError::log_corruption(format!("undo image: {e}")))?;
        if page.len() != len {
            return Err(CoreError::log_corruption(format!(
                "undo image expanded to {} bytes, expected {len}",
                page.len()
            )));
        }
        Ok(page)
    }

    /// Persists where the log starts.
    fn set_log_first_page(
        &mut self,
        log_key: u32,
        first_trunk: PageId,
        first_data: PageId,
    ) -> CoreResult<()>;

    /// Makes every page written so far durable.
    fn flush(&mut self) -> CoreResult<()>;
}
