//! In-memory page backend for testing.

use crate::backend::PageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory page backend.
///
/// Pages live in one contiguous buffer. Suitable for:
/// - Unit tests
/// - Crash simulations (copy the bytes out with [`InMemoryPageBackend::data`]
///   and reopen them with [`InMemoryPageBackend::with_data`])
/// - Ephemeral stores that don't need persistence
///
/// # Example
///
/// ```rust
/// use pagelog_storage::{PageBackend, InMemoryPageBackend};
///
/// let mut backend = InMemoryPageBackend::new(64);
/// backend.write_page(0, &[1u8; 64]).unwrap();
/// assert_eq!(backend.page_count().unwrap(), 1);
/// ```
#[derive(Debug)]
pub struct InMemoryPageBackend {
    page_size: usize,
    data: RwLock<Vec<u8>>,
}

impl InMemoryPageBackend {
    /// Creates a new empty backend with the given page size.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            data: RwLock::new(Vec::new()),
        }
    }

    /// Creates a backend over pre-existing page bytes.
    ///
    /// A trailing partial page is dropped. Useful for testing recovery.
    #[must_use]
    pub fn with_data(page_size: usize, mut data: Vec<u8>) -> Self {
        let whole = data.len() - data.len() % page_size.max(1);
        data.truncate(whole);
        Self {
            page_size,
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of all page bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl PageBackend for InMemoryPageBackend {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> StorageResult<u32> {
        Ok((self.data.read().len() / self.page_size) as u32)
    }

    fn read_page(&self, page_id: u32) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let page_count = (data.len() / self.page_size) as u32;
        if page_id >= page_count {
            return Err(StorageError::PageOutOfRange {
                page_id,
                page_count,
            });
        }
        let start = page_id as usize * self.page_size;
        Ok(data[start..start + self.page_size].to_vec())
    }

    fn write_page(&mut self, page_id: u32, page: &[u8]) -> StorageResult<()> {
        if page.len() != self.page_size {
            return Err(StorageError::PageSizeMismatch {
                expected: self.page_size,
                actual: page.len(),
            });
        }
        let mut data = self.data.write();
        let start = page_id as usize * self.page_size;
        let end = start + self.page_size;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(page);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        // In-memory backend has no pending writes
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryPageBackend::new(64);
        assert_eq!(backend.page_count().unwrap(), 0);
        assert!(backend.data().is_empty());
    }

    #[test]
    fn memory_write_extends_with_zero_pages() {
        let mut backend = InMemoryPageBackend::new(64);
        backend.write_page(2, &[9u8; 64]).unwrap();

        assert_eq!(backend.page_count().unwrap(), 3);
        assert_eq!(backend.read_page(0).unwrap(), vec![0u8; 64]);
        assert_eq!(backend.read_page(2).unwrap(), vec![9u8; 64]);
    }

    #[test]
    fn memory_overwrite_page() {
        let mut backend = InMemoryPageBackend::new(64);
        backend.write_page(0, &[1u8; 64]).unwrap();
        backend.write_page(0, &[2u8; 64]).unwrap();

        assert_eq!(backend.page_count().unwrap(), 1);
        assert_eq!(backend.read_page(0).unwrap(), vec![2u8; 64]);
    }

    #[test]
    fn memory_read_past_end_fails() {
        let mut backend = InMemoryPageBackend::new(64);
        backend.write_page(0, &[1u8; 64]).unwrap();

        let result = backend.read_page(1);
        assert!(matches!(
            result,
            Err(StorageError::PageOutOfRange {
                page_id: 1,
                page_count: 1
            })
        ));
    }

    #[test]
    fn memory_wrong_page_size_fails() {
        let mut backend = InMemoryPageBackend::new(64);
        let result = backend.write_page(0, &[0u8; 10]);
        assert!(matches!(
            result,
            Err(StorageError::PageSizeMismatch {
                expected: 64,
                actual: 10
            })
        ));
    }

    #[test]
    fn memory_with_data_drops_partial_page() {
        let backend = InMemoryPageBackend::with_data(64, vec![5u8; 150]);
        assert_eq!(backend.page_count().unwrap(), 2);
        assert_eq!(backend.data().len(), 128);
    }

    #[test]
    fn memory_flush_and_sync_succeed() {
        let mut backend = InMemoryPageBackend::new(64);
        backend.write_page(0, &[0u8; 64]).unwrap();
        assert!(backend.flush().is_ok());
        assert!(backend.sync().is_ok());
    }
}
