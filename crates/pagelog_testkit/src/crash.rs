//! Crash simulation for page backends.
//!
//! [`CrashablePageBackend`] keeps writes in a pending buffer until they are
//! flushed. A crash is modelled by dropping the backend (and the store that
//! owns it) and building a new one with [`CrashHandle::reopen`]: only
//! flushed pages survive.
//!
//! The handle can also make writes or flushes fail, and damage durable
//! pages, to test how the log copes with I/O errors and torn pages.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use pagelog_storage::{PageBackend, StorageError, StorageResult};
use parking_lot::Mutex;

#[derive(Debug)]
struct Shared {
    page_size: usize,
    durable: Mutex<Vec<u8>>,
    writes_left: AtomicUsize,
    fail_on_flush: AtomicBool,
    crashed: AtomicBool,
}

impl Shared {
    fn simulated(&self, what: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }
}

/// A page backend whose unflushed writes are lost on a crash.
#[derive(Debug)]
pub struct CrashablePageBackend {
    shared: Arc<Shared>,
    pending: BTreeMap<u32, Vec<u8>>,
}

/// Controls the durable state and fault injection of a
/// [`CrashablePageBackend`].
#[derive(Debug, Clone)]
pub struct CrashHandle {
    shared: Arc<Shared>,
}

impl CrashablePageBackend {
    /// Creates an empty backend and its handle.
    pub fn new(page_size: usize) -> (Self, CrashHandle) {
        let shared = Arc::new(Shared {
            page_size,
            durable: Mutex::new(Vec::new()),
            writes_left: AtomicUsize::new(usize::MAX),
            fail_on_flush: AtomicBool::new(false),
            crashed: AtomicBool::new(false),
        });
        let handle = CrashHandle {
            shared: Arc::clone(&shared),
        };
        (
            Self {
                shared,
                pending: BTreeMap::new(),
            },
            handle,
        )
    }

    /// Number of written pages not yet flushed.
    pub fn pending_pages(&self) -> usize {
        self.pending.len()
    }

    fn durable_page_count(&self) -> u32 {
        (self.shared.durable.lock().len() / self.shared.page_size) as u32
    }
}

impl PageBackend for CrashablePageBackend {
    fn page_size(&self) -> usize {
        self.shared.page_size
    }

    fn page_count(&self) -> StorageResult<u32> {
        let pending = self.pending.keys().next_back().map_or(0, |&id| id + 1);
        Ok(self.durable_page_count().max(pending))
    }

    fn read_page(&self, page_id: u32) -> StorageResult<Vec<u8>> {
        if let Some(page) = self.pending.get(&page_id) {
            return Ok(page.clone());
        }
        let page_count = self.page_count()?;
        if page_id >= page_count {
            return Err(StorageError::PageOutOfRange {
                page_id,
                page_count,
            });
        }
        let size = self.shared.page_size;
        let durable = self.shared.durable.lock();
        let start = page_id as usize * size;
        Ok(durable
            .get(start..start + size)
            .map_or_else(|| vec![0; size], <[u8]>::to_vec))
    }

    fn write_page(&mut self, page_id: u32, data: &[u8]) -> StorageResult<()> {
        if data.len() != self.shared.page_size {
            return Err(StorageError::PageSizeMismatch {
                expected: self.shared.page_size,
                actual: data.len(),
            });
        }
        let left = self.shared.writes_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(self.shared.simulated("page write"));
        }
        if left != usize::MAX {
            self.shared.writes_left.store(left - 1, Ordering::SeqCst);
        }
        self.pending.insert(page_id, data.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.shared.fail_on_flush.load(Ordering::SeqCst) {
            return Err(self.shared.simulated("flush"));
        }
        let size = self.shared.page_size;
        let mut durable = self.shared.durable.lock();
        for (page_id, page) in std::mem::take(&mut self.pending) {
            let start = page_id as usize * size;
            if durable.len() < start + size {
                durable.resize(start + size, 0);
            }
            durable[start..start + size].copy_from_slice(&page);
        }
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.flush()
    }
}

impl CrashHandle {
    /// Builds a fresh backend over the flushed pages, as a process would
    /// find them after a crash. Fault injection is reset.
    pub fn reopen(&self) -> CrashablePageBackend {
        self.reset_faults();
        CrashablePageBackend {
            shared: Arc::clone(&self.shared),
            pending: BTreeMap::new(),
        }
    }

    /// Lets `count` more page writes succeed; later writes fail.
    pub fn fail_writes_after(&self, count: usize) {
        self.shared.writes_left.store(count, Ordering::SeqCst);
    }

    /// Sets whether flush and sync fail.
    pub fn set_fail_on_flush(&self, fail: bool) {
        self.shared.fail_on_flush.store(fail, Ordering::SeqCst);
    }

    /// Clears injected faults and the crashed flag.
    pub fn reset_faults(&self) {
        self.shared.writes_left.store(usize::MAX, Ordering::SeqCst);
        self.shared.fail_on_flush.store(false, Ordering::SeqCst);
        self.shared.crashed.store(false, Ordering::SeqCst);
    }

    /// Whether an injected fault has fired.
    pub fn has_crashed(&self) -> bool {
        self.shared.crashed.load(Ordering::SeqCst)
    }

    /// Pages that survived the last flush.
    pub fn durable_page_count(&self) -> u32 {
        (self.shared.durable.lock().len() / self.shared.page_size) as u32
    }

    /// A copy of a durable page, if it exists.
    pub fn durable_page(&self, page_id: u32) -> Option<Vec<u8>> {
        let size = self.shared.page_size;
        let start = page_id as usize * size;
        self.shared
            .durable
            .lock()
            .get(start..start + size)
            .map(<[u8]>::to_vec)
    }

    /// Flips one byte of a durable page, simulating a torn write.
    ///
    /// Returns false if the page was never flushed.
    pub fn corrupt_page(&self, page_id: u32, offset: usize) -> bool {
        let size = self.shared.page_size;
        let mut durable = self.shared.durable.lock();
        match durable.get_mut(page_id as usize * size + offset % size) {
            Some(byte) => {
                *byte ^= 0xFF;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unflushed_writes_are_lost() {
        let (mut backend, handle) = CrashablePageBackend::new(64);
        backend.write_page(0, &[1; 64]).unwrap();
        backend.flush().unwrap();
        backend.write_page(0, &[2; 64]).unwrap();
        backend.write_page(3, &[3; 64]).unwrap();
        assert_eq!(backend.page_count().unwrap(), 4);
        assert_eq!(backend.read_page(0).unwrap(), vec![2; 64]);
        assert_eq!(backend.read_page(2).unwrap(), vec![0; 64]);
        assert_eq!(backend.pending_pages(), 2);

        let reopened = handle.reopen();
        assert_eq!(reopened.page_count().unwrap(), 1);
        assert_eq!(reopened.read_page(0).unwrap(), vec![1; 64]);
        assert!(reopened.read_page(3).is_err());
    }

    #[test]
    fn write_failure_injection() {
        let (mut backend, handle) = CrashablePageBackend::new(64);
        handle.fail_writes_after(1);
        backend.write_page(0, &[1; 64]).unwrap();
        assert!(backend.write_page(1, &[1; 64]).is_err());
        assert!(handle.has_crashed());
        handle.reset_faults();
        backend.write_page(1, &[1; 64]).unwrap();
    }

    #[test]
    fn flush_failure_keeps_pending() {
        let (mut backend, handle) = CrashablePageBackend::new(64);
        backend.write_page(0, &[1; 64]).unwrap();
        handle.set_fail_on_flush(true);
        assert!(backend.sync().is_err());
        assert_eq!(handle.durable_page_count(), 0);
        handle.set_fail_on_flush(false);
        backend.sync().unwrap();
        assert_eq!(handle.durable_page(0), Some(vec![1; 64]));
    }

    #[test]
    fn corrupt_durable_page() {
        let (mut backend, handle) = CrashablePageBackend::new(64);
        assert!(!handle.corrupt_page(0, 5));
        backend.write_page(0, &[0; 64]).unwrap();
        backend.flush().unwrap();
        assert!(handle.corrupt_page(0, 5));
        assert_eq!(handle.durable_page(0).unwrap()[5], 0xFF);
    }
}
