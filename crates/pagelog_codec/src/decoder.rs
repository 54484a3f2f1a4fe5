//! Decoding primitives.
//!
//! [`ByteSource`] carries the varint, varlong and string decoders as default
//! methods, so any byte stream (a slice, or the log's page chain) gets the
//! exact same wire format by implementing two methods.

use crate::error::{CodecError, CodecResult};

/// Upper bound on any length prefix (strings and byte arrays).
pub const MAX_BYTES_LENGTH: u32 = 16 * 1024 * 1024;

/// A forward-only source of bytes.
///
/// The associated error type lets a source report its own failures
/// (for example a broken page chain) while still surfacing codec errors.
pub trait ByteSource {
    /// Error produced by this source.
    type Error: From<CodecError>;

    /// Reads one byte, or `None` at the end of the input.
    fn read_byte(&mut self) -> Result<Option<u8>, Self::Error>;

    /// Fills `buf` completely or fails.
    fn read_fully(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Reads one byte, treating end of input as an error.
    fn read_u8(&mut self) -> Result<u8, Self::Error> {
        match self.read_byte()? {
            Some(b) => Ok(b),
            None => Err(CodecError::UnexpectedEof.into()),
        }
    }

    /// Reads a varint-encoded `u32`.
    fn read_var_int(&mut self) -> Result<u32, Self::Error> {
        let mut result = 0u32;
        for shift in (0..35).step_by(7) {
            let b = self.read_u8()?;
            if shift == 28 && b > 0x0F {
                return Err(CodecError::VarIntOverflow.into());
            }
            result |= u32::from(b & 0x7F) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(CodecError::VarIntOverflow.into())
    }

    /// Reads a varint-encoded `i32` (two's complement).
    fn read_var_i32(&mut self) -> Result<i32, Self::Error> {
        self.read_var_int().map(|v| v as i32)
    }

    /// Reads a varlong-encoded `u64`.
    fn read_var_long(&mut self) -> Result<u64, Self::Error> {
        let mut result = 0u64;
        for shift in (0..70).step_by(7) {
            let b = self.read_u8()?;
            if shift == 63 && b > 0x01 {
                return Err(CodecError::VarIntOverflow.into());
            }
            result |= u64::from(b & 0x7F) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(CodecError::VarIntOverflow.into())
    }

    /// Reads a varlong-encoded `i64` (two's complement).
    fn read_var_i64(&mut self) -> Result<i64, Self::Error> {
        self.read_var_long().map(|v| v as i64)
    }

    /// Reads exactly `len` bytes.
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, Self::Error> {
        let mut buf = vec![0u8; len];
        self.read_fully(&mut buf)?;
        Ok(buf)
    }

    /// Reads a length-prefixed byte array.
    fn read_len_prefixed(&mut self) -> Result<Vec<u8>, Self::Error> {
        let len = self.read_var_int()?;
        if len > MAX_BYTES_LENGTH {
            return Err(CodecError::LengthTooLarge {
                len: u64::from(len),
                max: u64::from(MAX_BYTES_LENGTH),
            }
            .into());
        }
        self.read_bytes(len as usize)
    }

    /// Reads a length-prefixed UTF-8 string.
    fn read_string(&mut self) -> Result<String, Self::Error> {
        let bytes = self.read_len_prefixed()?;
        String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8.into())
    }
}

/// A [`ByteSource`] over a byte slice.
#[derive(Debug, Clone)]
pub struct DataReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DataReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset into the input.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns true once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Fails if any bytes are left unread.
    pub fn finish(&self) -> CodecResult<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

impl ByteSource for DataReader<'_> {
    type Error = CodecError;

    fn read_byte(&mut self) -> CodecResult<Option<u8>> {
        let b = self.data.get(self.pos).copied();
        if b.is_some() {
            self.pos += 1;
        }
        Ok(b)
    }

    fn read_fully(&mut self, buf: &mut [u8]) -> CodecResult<()> {
        if self.remaining() < buf.len() {
            return Err(CodecError::UnexpectedEof);
        }
        buf.copy_from_slice(&self.data[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{var_int_len, var_long_len, DataWriter};
    use proptest::prelude::*;

    #[test]
    fn single_byte_varints() {
        let mut r = DataReader::new(&[0x00, 0x7F]);
        assert_eq!(r.read_var_int().unwrap(), 0);
        assert_eq!(r.read_var_int().unwrap(), 127);
        assert!(r.is_empty());
    }

    #[test]
    fn multi_byte_varint() {
        let mut r = DataReader::new(&[0xAC, 0x02]);
        assert_eq!(r.read_var_int().unwrap(), 300);
    }

    #[test]
    fn max_varint_takes_five_bytes() {
        let mut r = DataReader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        assert_eq!(r.read_var_int().unwrap(), u32::MAX);
    }

    #[test]
    fn varint_overflow_rejected() {
        let mut r = DataReader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x1F]);
        assert_eq!(r.read_var_int(), Err(CodecError::VarIntOverflow));
    }

    #[test]
    fn truncated_varint_is_eof() {
        let mut r = DataReader::new(&[0x80, 0x80]);
        assert_eq!(r.read_var_int(), Err(CodecError::UnexpectedEof));
    }

    #[test]
    fn varlong_overflow_rejected() {
        let mut bytes = vec![0xFF; 9];
        bytes.push(0x02);
        let mut r = DataReader::new(&bytes);
        assert_eq!(r.read_var_long(), Err(CodecError::VarIntOverflow));
    }

    #[test]
    fn string_with_bad_utf8() {
        let mut r = DataReader::new(&[0x02, 0xC3, 0x28]);
        assert_eq!(r.read_string(), Err(CodecError::InvalidUtf8));
    }

    #[test]
    fn read_fully_short_input() {
        let mut r = DataReader::new(&[1, 2]);
        let mut buf = [0u8; 3];
        assert_eq!(r.read_fully(&mut buf), Err(CodecError::UnexpectedEof));
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn oversized_length_prefix() {
        let mut w = DataWriter::new();
        w.write_var_int(MAX_BYTES_LENGTH + 1);
        let bytes = w.into_bytes();
        let mut r = DataReader::new(&bytes);
        assert!(matches!(
            r.read_len_prefixed(),
            Err(CodecError::LengthTooLarge { .. })
        ));
    }

    #[test]
    fn finish_reports_trailing() {
        let mut r = DataReader::new(&[1, 2, 3]);
        r.read_u8().unwrap();
        assert_eq!(r.finish(), Err(CodecError::TrailingBytes(2)));
    }

    proptest! {
        #[test]
        fn varints_read_back(a in any::<u32>(), b in any::<u64>(), c in any::<i32>()) {
            let mut w = DataWriter::new();
            w.write_var_int(a);
            w.write_var_long(b);
            w.write_var_i32(c);
            prop_assert_eq!(w.len(), var_int_len(a) + var_long_len(b) + var_int_len(c as u32));
            let bytes = w.into_bytes();
            let mut r = DataReader::new(&bytes);
            prop_assert_eq!(r.read_var_int().unwrap(), a);
            prop_assert_eq!(r.read_var_long().unwrap(), b);
            prop_assert_eq!(r.read_var_i32().unwrap(), c);
            prop_assert!(r.is_empty());
        }
    }
}
