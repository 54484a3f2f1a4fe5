//! # pagelog codec
//!
//! The row codec shared by the page store and its transaction log.
//!
//! Everything the log writes goes through these primitives, so a log written
//! by one process can be read back bit-for-bit by the next:
//!
//! - **varint**: `u32`, 7 bits per byte, low bits first, high bit set on
//!   every byte but the last (at most 5 bytes)
//! - **varlong**: the same for `u64` (at most 10 bytes)
//! - negative `i32`/`i64` are written as their two's-complement unsigned
//!   value, so they always take the maximum width
//! - **string**: varint byte length, then UTF-8 bytes
//! - **value**: one tag byte, then a tag-specific payload
//! - **row payload**: varint column count, then each value
//!
//! ## Usage
//!
//! ```
//! use pagelog_codec::{ByteSource, DataReader, DataWriter};
//!
//! let mut writer = DataWriter::new();
//! writer.write_var_int(300);
//! writer.write_string("tx1");
//!
//! let bytes = writer.into_bytes();
//! let mut reader = DataReader::new(&bytes);
//! assert_eq!(reader.read_var_int().unwrap(), 300);
//! assert_eq!(reader.read_string().unwrap(), "tx1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod value;

pub use decoder::{ByteSource, DataReader, MAX_BYTES_LENGTH};
pub use encoder::{var_int_len, var_long_len, DataWriter};
pub use error::{CodecError, CodecResult};
pub use value::{Row, Value};
