//! Encoding primitives.

use bytes::{BufMut, BytesMut};

use crate::value::Value;

/// Number of bytes `value` takes as a varint.
pub const fn var_int_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0xFFF_FFFF => 4,
        _ => 5,
    }
}

/// Number of bytes `value` takes as a varlong.
pub const fn var_long_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// An append-only encoder backed by a [`BytesMut`].
#[derive(Debug, Clone, Default)]
pub struct DataWriter {
    buffer: BytesMut,
}

impl DataWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty writer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Writes a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.put_u8(value);
    }

    /// Writes a varint-encoded `u32`.
    pub fn write_var_int(&mut self, mut value: u32) {
        while value >= 0x80 {
            self.buffer.put_u8((value as u8 & 0x7F) | 0x80);
            value >>= 7;
        }
        self.buffer.put_u8(value as u8);
    }

    /// Writes an `i32` as the varint of its two's-complement bits.
    pub fn write_var_i32(&mut self, value: i32) {
        self.write_var_int(value as u32);
    }

    /// Writes a varlong-encoded `u64`.
    pub fn write_var_long(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buffer.put_u8((value as u8 & 0x7F) | 0x80);
            value >>= 7;
        }
        self.buffer.put_u8(value as u8);
    }

    /// Writes an `i64` as the varlong of its two's-complement bits.
    pub fn write_var_i64(&mut self, value: i64) {
        self.write_var_long(value as u64);
    }

    /// Writes raw bytes with no prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.put_slice(bytes);
    }

    /// Writes a varint length followed by the bytes.
    pub fn write_len_prefixed(&mut self, bytes: &[u8]) {
        self.write_var_int(bytes.len() as u32);
        self.write_bytes(bytes);
    }

    /// Writes a varint byte length followed by the UTF-8 bytes.
    pub fn write_string(&mut self, value: &str) {
        self.write_len_prefixed(value.as_bytes());
    }

    /// Writes a tagged value.
    pub fn write_value(&mut self, value: &Value) {
        value.write_to(self);
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// The encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the writer, returning the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    /// Discards everything written, keeping the allocation.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_bytes() {
        let mut w = DataWriter::new();
        w.write_var_int(0);
        w.write_var_int(127);
        w.write_var_int(128);
        w.write_var_int(300);
        assert_eq!(w.as_bytes(), &[0x00, 0x7F, 0x80, 0x01, 0xAC, 0x02]);
    }

    #[test]
    fn negative_int_takes_five_bytes() {
        let mut w = DataWriter::new();
        w.write_var_i32(-1);
        assert_eq!(w.as_bytes(), &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
    }

    #[test]
    fn negative_long_takes_ten_bytes() {
        let mut w = DataWriter::new();
        w.write_var_i64(-1);
        assert_eq!(w.len(), 10);
        assert_eq!(w.as_bytes()[9], 0x01);
    }

    #[test]
    fn lengths_match_encoding() {
        for v in [0u32, 1, 127, 128, 16_383, 16_384, 2_097_151, 2_097_152, u32::MAX] {
            let mut w = DataWriter::new();
            w.write_var_int(v);
            assert_eq!(w.len(), var_int_len(v), "value {v}");
        }
        assert_eq!(var_long_len(u64::MAX), 10);
    }

    #[test]
    fn string_is_length_prefixed() {
        let mut w = DataWriter::new();
        w.write_string("tx1");
        assert_eq!(w.as_bytes(), &[3, b't', b'x', b'1']);
    }

    #[test]
    fn clear_resets() {
        let mut w = DataWriter::with_capacity(16);
        w.write_u8(9);
        assert!(!w.is_empty());
        w.clear();
        assert!(w.is_empty());
    }
}
