//! Error types for page backend operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during page backend operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read a page that was never written.
    #[error("page {page_id} is beyond the end of storage ({page_count} pages)")]
    PageOutOfRange {
        /// The requested page.
        page_id: u32,
        /// The current number of pages.
        page_count: u32,
    },

    /// A page buffer did not have the backend's page size.
    #[error("page buffer has {actual} bytes, expected {expected}")]
    PageSizeMismatch {
        /// The backend's page size.
        expected: usize,
        /// The size of the buffer that was passed in.
        actual: usize,
    },

    /// The backend file is not a whole number of pages.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the backend file.
    #[error("storage locked: another process has exclusive access")]
    Locked,
}
