//! Configuration for the transaction log and the reference page store.

use crate::error::{CoreError, CoreResult};

/// Smallest supported page size.
pub const MIN_PAGE_SIZE: usize = 64;

/// Largest supported page size.
pub const MAX_PAGE_SIZE: usize = 32 * 1024;

/// Page size used when none is configured.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Configuration for a [`crate::TransactionLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Whether `commit` and `prepare_commit` flush the log before returning.
    pub flush_on_commit: bool,

    /// Whether undo images are compressed with the store's compressor.
    pub compress_undo: bool,

    /// Bytes of stream capacity reserved when the log is opened for writing.
    pub reserve_bytes: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            flush_on_commit: true,
            compress_undo: true,
            reserve_bytes: 1,
        }
    }
}

impl LogConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether commits flush the log.
    #[must_use]
    pub const fn flush_on_commit(mut self, value: bool) -> Self {
        self.flush_on_commit = value;
        self
    }

    /// Sets whether undo images are compressed.
    #[must_use]
    pub const fn compress_undo(mut self, value: bool) -> Self {
        self.compress_undo = value;
        self
    }

    /// Sets the capacity reserved on open.
    #[must_use]
    pub const fn reserve_bytes(mut self, bytes: usize) -> Self {
        self.reserve_bytes = bytes;
        self
    }
}

/// Configuration for a [`crate::PageStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Page size in bytes; a power of two in `[MIN_PAGE_SIZE, MAX_PAGE_SIZE]`.
    pub page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size.
    #[must_use]
    pub const fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Checks that the page size is supported.
    pub fn validate(&self) -> CoreResult<()> {
        validate_page_size(self.page_size)
    }
}

pub(crate) fn validate_page_size(page_size: usize) -> CoreResult<()> {
    if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(CoreError::invalid_operation(format!(
            "page size {page_size} is not a power of two in [{MIN_PAGE_SIZE}, {MAX_PAGE_SIZE}]"
        )));
    }
    Ok(())
}
