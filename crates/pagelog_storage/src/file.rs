//! File-based page backend for persistent storage.

use crate::backend::PageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based page backend.
///
/// Page `n` lives at byte offset `n * page_size`. The file is locked
/// exclusively for as long as the backend is open, so only one page store
/// can write it at a time.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
///
/// # Example
///
/// ```no_run
/// use pagelog_storage::{PageBackend, FilePageBackend};
/// use std::path::Path;
///
/// let mut backend = FilePageBackend::open(Path::new("store.pages"), 4096).unwrap();
/// backend.write_page(0, &[0u8; 4096]).unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FilePageBackend {
    path: PathBuf,
    page_size: usize,
    file: RwLock<File>,
    page_count: RwLock<u32>,
}

impl FilePageBackend {
    /// Opens or creates a page file and locks it exclusively.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be opened or created
    /// - Another process holds the lock (`Locked`)
    /// - The file length is not a multiple of `page_size` (`Corrupted`)
    pub fn open(path: &Path, page_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let len = file.metadata()?.len();
        if len % page_size as u64 != 0 {
            return Err(StorageError::Corrupted(format!(
                "file length {len} is not a multiple of the page size {page_size}"
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            page_size,
            file: RwLock::new(file),
            page_count: RwLock::new((len / page_size as u64) as u32),
        })
    }

    /// Opens or creates a page file, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path, page_size: usize) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path, page_size)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PageBackend for FilePageBackend {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> StorageResult<u32> {
        Ok(*self.page_count.read())
    }

    fn read_page(&self, page_id: u32) -> StorageResult<Vec<u8>> {
        let page_count = *self.page_count.read();
        if page_id >= page_count {
            return Err(StorageError::PageOutOfRange {
                page_id,
                page_count,
            });
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(page_id as u64 * self.page_size as u64))?;

        let mut buffer = vec![0u8; self.page_size];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn write_page(&mut self, page_id: u32, data: &[u8]) -> StorageResult<()> {
        if data.len() != self.page_size {
            return Err(StorageError::PageSizeMismatch {
                expected: self.page_size,
                actual: data.len(),
            });
        }

        let mut file = self.file.write();
        let mut page_count = self.page_count.write();

        // Seeking past the end leaves a hole that reads back as zeros.
        file.seek(SeekFrom::Start(page_id as u64 * self.page_size as u64))?;
        file.write_all(data)?;
        *page_count = (*page_count).max(page_id + 1);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.write().flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }
}

impl Drop for FilePageBackend {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&*self.file.read());
    }
}
