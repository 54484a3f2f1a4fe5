//! Page backend trait definition.

use crate::error::StorageResult;

/// A low-level page backend.
///
/// Backends are **opaque page arrays**. They read and write whole pages of
/// a fixed size. The page store above owns all interpretation of the
/// bytes - backends do not understand page kinds, checksums or logs.
///
/// # Invariants
///
/// - every page is exactly [`PageBackend::page_size`] bytes
/// - `read_page` returns the bytes last written for that id
/// - writing page `n` extends the backend to at least `n + 1` pages; pages
///   in the gap read as zeros
/// - `flush` makes every previous write durable
pub trait PageBackend: Send + Sync {
    /// Returns the size of one page in bytes.
    fn page_size(&self) -> usize;

    /// Returns the number of pages currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn page_count(&self) -> StorageResult<u32>;

    /// Reads one page.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `page_id` is not below [`PageBackend::page_count`]
    /// - An I/O error occurs
    fn read_page(&self, page_id: u32) -> StorageResult<Vec<u8>>;

    /// Writes one page, growing the backend if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `data` is not exactly one page long
    /// - An I/O error occurs
    fn write_page(&mut self, page_id: u32, data: &[u8]) -> StorageResult<()>;

    /// Flushes all pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Syncs data and metadata (file length) to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;
}
