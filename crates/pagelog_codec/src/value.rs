//! Column values and rows.
//!
//! A row payload is a varint column count followed by that many tagged
//! values. The row key travels separately (the log writes it as a varlong
//! ahead of the payload).

use crate::decoder::{ByteSource, DataReader};
use crate::encoder::DataWriter;
use crate::error::{CodecError, CodecResult};

const TAG_NULL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_LONG: u8 = 4;
const TAG_DOUBLE: u8 = 5;
const TAG_BYTES: u8 = 6;
const TAG_STRING: u8 = 7;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL-style null.
    Null,
    /// Boolean.
    Bool(bool),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// 64-bit float, stored as big-endian IEEE-754 bits.
    Double(f64),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    String(String),
}

impl Value {
    /// Writes the tag and payload.
    pub fn write_to(&self, w: &mut DataWriter) {
        match self {
            Value::Null => w.write_u8(TAG_NULL),
            Value::Bool(false) => w.write_u8(TAG_FALSE),
            Value::Bool(true) => w.write_u8(TAG_TRUE),
            Value::Int(v) => {
                w.write_u8(TAG_INT);
                w.write_var_i32(*v);
            }
            Value::Long(v) => {
                w.write_u8(TAG_LONG);
                w.write_var_i64(*v);
            }
            Value::Double(v) => {
                w.write_u8(TAG_DOUBLE);
                w.write_bytes(&v.to_bits().to_be_bytes());
            }
            Value::Bytes(v) => {
                w.write_u8(TAG_BYTES);
                w.write_len_prefixed(v);
            }
            Value::String(v) => {
                w.write_u8(TAG_STRING);
                w.write_string(v);
            }
        }
    }

    /// Reads one tagged value.
    pub fn read_from<S: ByteSource + ?Sized>(src: &mut S) -> Result<Value, S::Error> {
        let value = match src.read_u8()? {
            TAG_NULL => Value::Null,
            TAG_FALSE => Value::Bool(false),
            TAG_TRUE => Value::Bool(true),
            TAG_INT => Value::Int(src.read_var_i32()?),
            TAG_LONG => Value::Long(src.read_var_i64()?),
            TAG_DOUBLE => {
                let mut bits = [0u8; 8];
                src.read_fully(&mut bits)?;
                Value::Double(f64::from_bits(u64::from_be_bytes(bits)))
            }
            TAG_BYTES => Value::Bytes(src.read_len_prefixed()?),
            TAG_STRING => Value::String(src.read_string()?),
            tag => return Err(CodecError::UnknownValueTag(tag).into()),
        };
        Ok(value)
    }

    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The value as an `i64`, if it is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as a string slice, if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// A keyed row of column values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    key: i64,
    values: Vec<Value>,
}

impl Row {
    /// Creates a row.
    pub fn new(key: i64, values: Vec<Value>) -> Self {
        Self { key, values }
    }

    /// The row key.
    pub fn key(&self) -> i64 {
        self.key
    }

    /// All column values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The value of column `index`.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.values.len()
    }

    /// Appends the column count and values (not the key).
    pub fn encode_payload(&self, w: &mut DataWriter) {
        w.write_var_int(self.values.len() as u32);
        for value in &self.values {
            value.write_to(w);
        }
    }

    /// Encodes the payload into a fresh buffer.
    pub fn payload_bytes(&self) -> Vec<u8> {
        let mut w = DataWriter::new();
        self.encode_payload(&mut w);
        w.into_bytes()
    }

    /// Decodes a payload produced by [`Row::encode_payload`].
    ///
    /// The whole slice must be consumed.
    pub fn decode_payload(key: i64, bytes: &[u8]) -> CodecResult<Row> {
        let mut r = DataReader::new(bytes);
        let count = r.read_var_int()? as usize;
        // every value takes at least its tag byte
        if count > r.remaining() {
            return Err(CodecError::UnexpectedEof);
        }
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(Value::read_from(&mut r)?);
        }
        r.finish()?;
        Ok(Row { key, values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        Row::new(
            42,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::Int(-7),
                Value::Long(1 << 40),
                Value::Double(2.5),
                Value::Bytes(vec![1, 2, 3]),
                Value::from("hello"),
            ],
        )
    }

    #[test]
    fn row_payload_reads_back() {
        let row = sample();
        let bytes = row.payload_bytes();
        let decoded = Row::decode_payload(42, &bytes).unwrap();
        assert_eq!(decoded, row);
        assert_eq!(decoded.column_count(), 7);
        assert_eq!(decoded.value(3).and_then(Value::as_i64), Some(1 << 40));
    }

    #[test]
    fn unknown_tag() {
        assert_eq!(
            Row::decode_payload(1, &[1, 99]),
            Err(CodecError::UnknownValueTag(99))
        );
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = Row::new(1, vec![Value::Int(1)]).payload_bytes();
        bytes.push(0);
        assert_eq!(
            Row::decode_payload(1, &bytes),
            Err(CodecError::TrailingBytes(1))
        );
    }

    #[test]
    fn impossible_column_count() {
        assert_eq!(
            Row::decode_payload(1, &[0x7F, 0]),
            Err(CodecError::UnexpectedEof)
        );
    }

    #[test]
    fn double_is_big_endian() {
        let mut w = DataWriter::new();
        w.write_value(&Value::Double(1.0));
        assert_eq!(w.as_bytes(), &[5, 0x3F, 0xF0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn accessors() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::from(3i32).as_i64(), Some(3));
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::from(true).as_str(), None);
    }
}
