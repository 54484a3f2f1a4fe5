//! Error types for pagelog core.

use std::io;
use thiserror::Error;

use crate::types::PageId;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in pagelog core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] pagelog_storage::StorageError),

    /// Row codec error.
    #[error("codec error: {0}")]
    Codec(#[from] pagelog_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A page failed its checksum or has an impossible layout.
    #[error("page {page_id} corrupted: {message}")]
    PageCorrupted {
        /// The page that failed to decode.
        page_id: PageId,
        /// Description of the corruption.
        message: String,
    },

    /// The log stream or one of its records is malformed.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Invalid store format or version.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// A caller-supplied value cannot be encoded.
    #[error("invalid value: {message}")]
    InvalidValue {
        /// Description of the rejected value.
        message: String,
    },

    /// An internal invariant was violated.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },

    /// An earlier write failed; the log accepts no more records until reopened.
    #[error("transaction log is unusable after a failed write")]
    LogUnusable,
}

impl CoreError {
    /// Creates a page corruption error.
    pub fn page_corrupted(page_id: PageId, message: impl Into<String>) -> Self {
        Self::PageCorrupted {
            page_id,
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true for errors that recovery treats as the end of the log.
    ///
    /// These are the shapes a log takes when the process died mid-write:
    /// truncated records, stale or torn pages, unreadable tails.
    pub fn is_end_of_log(&self) -> bool {
        matches!(
            self,
            Self::Codec(_)
                | Self::PageCorrupted { .. }
                | Self::LogCorruption { .. }
                | Self::Storage(_)
                | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagelog_codec::CodecError;

    #[test]
    fn end_of_log_classification() {
        assert!(CoreError::from(CodecError::UnexpectedEof).is_end_of_log());
        assert!(CoreError::page_corrupted(4, "bad checksum").is_end_of_log());
        assert!(CoreError::log_corruption("unknown record type 42").is_end_of_log());
        assert!(!CoreError::internal("undo image has wrong size").is_end_of_log());
        assert!(!CoreError::invalid_value("name too long").is_end_of_log());
        assert!(!CoreError::LogUnusable.is_end_of_log());
    }

    #[test]
    fn messages() {
        let err = CoreError::page_corrupted(7, "checksum mismatch");
        assert_eq!(err.to_string(), "page 7 corrupted: checksum mismatch");
    }
}
