//! Log stream data pages.
//!
//! ```text
//! | kind (1) | checksum (2) | trunk (4) | log key (4) | bytes ... |
//! ```
//!
//! Bytes never written stay zero; the log reads them as NOOP records.

use crate::error::{CoreError, CoreResult};
use crate::page::{read_u32, update_checksum, write_u32, PageKind};
use crate::types::PageId;

const TRUNK_OFFSET: usize = 3;
const KEY_OFFSET: usize = 7;
const DATA_START: usize = 11;

/// A data page of the log stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogStreamData {
    page_id: PageId,
    trunk: PageId,
    log_key: u32,
    payload: Vec<u8>,
    written: usize,
}

impl LogStreamData {
    /// Payload bytes one data page holds.
    pub const fn capacity(page_size: usize) -> usize {
        page_size - DATA_START
    }

    /// Creates an empty data page owned by `trunk`.
    pub fn new(page_id: PageId, trunk: PageId, log_key: u32, page_size: usize) -> Self {
        Self {
            page_id,
            trunk,
            log_key,
            payload: vec![0; Self::capacity(page_size)],
            written: 0,
        }
    }

    /// Decodes a data page read from `page_id`. The whole payload is
    /// readable.
    pub fn decode(page_id: PageId, data: &[u8]) -> CoreResult<Self> {
        if data.len() <= DATA_START || data[0] != PageKind::StreamData.as_byte() {
            return Err(CoreError::page_corrupted(page_id, "not a stream data page"));
        }
        Ok(Self {
            page_id,
            trunk: read_u32(data, TRUNK_OFFSET),
            log_key: read_u32(data, KEY_OFFSET),
            payload: data[DATA_START..].to_vec(),
            written: data.len() - DATA_START,
        })
    }

    /// Encodes the page, checksum included.
    pub fn encode(&self) -> Vec<u8> {
        let mut data = vec![0u8; DATA_START + self.payload.len()];
        data[0] = PageKind::StreamData.as_byte();
        write_u32(&mut data, TRUNK_OFFSET, self.trunk);
        write_u32(&mut data, KEY_OFFSET, self.log_key);
        data[DATA_START..].copy_from_slice(&self.payload);
        update_checksum(self.page_id, &mut data);
        data
    }

    /// Rewinds the write cursor to the start of the payload.
    pub fn init_write(&mut self) {
        self.written = 0;
    }

    /// Appends as much of `bytes` as fits; returns the count written.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining());
        self.payload[self.written..self.written + n].copy_from_slice(&bytes[..n]);
        self.written += n;
        n
    }

    /// Zeroes everything after the write cursor and moves it to the end.
    pub fn zero_remaining(&mut self) {
        self.payload[self.written..].fill(0);
        self.written = self.payload.len();
    }

    /// Payload bytes left after the write cursor.
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.written
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// The payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// This page's id.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// The trunk that owns this page.
    pub fn trunk(&self) -> PageId {
        self.trunk
    }

    /// The log key stamped on this page.
    pub fn log_key(&self) -> u32 {
        self.log_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Page;

    #[test]
    fn capacity() {
        assert_eq!(LogStreamData::capacity(64), 53);
        assert_eq!(LogStreamData::capacity(4096), 4085);
    }

    #[test]
    fn write_stops_at_capacity() {
        let mut data = LogStreamData::new(5, 4, 1, 64);
        assert_eq!(data.write(&[7; 50]), 50);
        assert_eq!(data.write(&[8; 10]), 3);
        assert_eq!(data.remaining(), 0);
        assert_eq!(data.write(&[9]), 0);
    }

    #[test]
    fn encode_decode() {
        let mut data = LogStreamData::new(5, 4, 12, 64);
        data.write(b"abc");
        let bytes = data.encode();
        let Page::Data(decoded) = Page::decode(5, &bytes).unwrap() else {
            panic!("expected data page");
        };
        assert_eq!(decoded.trunk(), 4);
        assert_eq!(decoded.log_key(), 12);
        assert_eq!(&decoded.payload()[..4], b"abc\0");
        assert_eq!(decoded.remaining(), 0);
    }

    #[test]
    fn rewrite_in_place() {
        let mut data = LogStreamData::new(5, 4, 1, 64);
        data.write(&[3; 20]);
        data.init_write();
        data.write(&[2, 1]);
        data.zero_remaining();
        assert_eq!(&data.payload()[..3], &[2, 1, 0]);
        assert!(data.payload()[2..].iter().all(|&b| b == 0));
    }
}
