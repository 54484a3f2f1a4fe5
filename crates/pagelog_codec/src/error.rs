//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during decoding.
///
/// Encoding into a [`crate::DataWriter`] cannot fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A varint or varlong had too many bytes or bits.
    #[error("varint overflow")]
    VarIntOverflow,

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Unknown value tag.
    #[error("unknown value tag {0}")]
    UnknownValueTag(u8),

    /// A length prefix exceeded the allowed maximum.
    #[error("length {len} exceeds the maximum of {max}")]
    LengthTooLarge {
        /// The decoded length.
        len: u64,
        /// The maximum accepted length.
        max: u64,
    },

    /// Bytes were left over after a complete payload.
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}
