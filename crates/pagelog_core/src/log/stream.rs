//! The log's page stream.
//!
//! The stream is a chain of trunk pages, each listing the data pages that
//! follow it:
//!
//! ```text
//! trunk(key k) ─▶ data, data, ..., data ─▶ trunk(key k+1) ─▶ data, ...
//! ```
//!
//! Each trunk records its parent and the page reserved for the next trunk.
//! Keys grow by one per trunk, and data pages carry their trunk's key and
//! id. A reader follows the chain only while all of that agrees, so a page
//! left behind by an older chain (or never written) ends the stream.
//!
//! Pages are reserved ahead of use in batches of one trunk plus its data
//! pages, so appending a record never has to allocate in the middle of
//! writing a page.

use pagelog_codec::{ByteSource, CodecError};

use crate::bitset::BitField;
use crate::error::{CoreError, CoreResult};
use crate::log::record::LogRecord;
use crate::page::{LogStreamData, LogStreamTrunk, Page, TrunkIterator};
use crate::store::LogStore;
use crate::types::PageId;

/// Writer side of the log stream.
#[derive(Debug)]
pub struct LogPageStream {
    page_size: usize,
    next_key: u32,
    trunk_page_id: PageId,
    trunk_next: PageId,
    trunk: Option<LogStreamTrunk>,
    trunk_index: usize,
    data: Option<LogStreamData>,
    reserved_pages: Vec<PageId>,
    reserved: usize,
    need_flush: bool,
    page_count: u64,
    min_page_id: PageId,
    at_end: bool,
}

impl LogPageStream {
    /// Starts a stream whose first trunk is `first_trunk`, stamped with
    /// `first_key`, and reserves room for `reserve_bytes`.
    ///
    /// With `at_end`, new pages are allocated after `first_trunk`.
    pub fn open_for_write(
        store: &mut dyn LogStore,
        first_trunk: PageId,
        first_key: u32,
        at_end: bool,
        reserve_bytes: usize,
        exclude: &BitField,
    ) -> CoreResult<Self> {
        let mut stream = Self {
            page_size: store.page_size(),
            next_key: first_key,
            trunk_page_id: 0,
            trunk_next: first_trunk,
            trunk: None,
            trunk_index: 0,
            data: None,
            reserved_pages: Vec::new(),
            reserved: 0,
            need_flush: false,
            page_count: 0,
            min_page_id: if at_end { first_trunk } else { 0 },
            at_end,
        };
        stream.reserve(store, reserve_bytes.max(1), exclude)?;
        Ok(stream)
    }

    /// Makes sure at least `min` bytes can be written without allocating.
    pub fn reserve(
        &mut self,
        store: &mut dyn LogStore,
        min: usize,
        exclude: &BitField,
    ) -> CoreResult<()> {
        if self.reserved < min {
            let capacity = LogStreamData::capacity(self.page_size);
            let per_trunk = LogStreamTrunk::pages_addressed(self.page_size);
            let mut pages = 0;
            let mut total = 0;
            loop {
                pages += per_trunk + 1;
                total += per_trunk * capacity;
                if total + self.reserved >= min {
                    break;
                }
            }
            let hint = if self.at_end {
                self.trunk_page_id.max(self.min_page_id)
            } else {
                0
            };
            let ids = store.allocate_pages(pages, exclude, hint)?;
            self.reserved_pages.extend(ids);
            self.reserved += total;
            if self.data.is_none() {
                self.init_next_data(store)?;
            }
        }
        Ok(())
    }

    fn init_next_data(&mut self, store: &mut dyn LogStore) -> CoreResult<()> {
        let next = self
            .trunk
            .as_ref()
            .and_then(|t| t.data_page(self.trunk_index));
        let next = match next {
            Some(id) => {
                self.trunk_index += 1;
                id
            }
            None => {
                let len = LogStreamTrunk::pages_addressed(self.page_size);
                if self.reserved_pages.len() <= len {
                    return Err(CoreError::internal(format!(
                        "log stream has {} reserved pages, a trunk needs {}",
                        self.reserved_pages.len(),
                        len + 1
                    )));
                }
                let following = self
                    .next_key
                    .checked_add(1)
                    .ok_or_else(|| CoreError::invalid_operation("log keys exhausted"))?;
                let parent = self.trunk_page_id;
                if self.trunk_next != 0 {
                    self.trunk_page_id = self.trunk_next;
                }
                let page_ids: Vec<PageId> = self.reserved_pages.drain(..len).collect();
                self.trunk_next = self.reserved_pages.remove(0);
                let trunk = LogStreamTrunk::new(
                    self.trunk_page_id,
                    parent,
                    self.next_key,
                    self.trunk_next,
                    page_ids,
                );
                self.next_key = following;
                store.write_page(self.trunk_page_id, &trunk.encode(self.page_size)?)?;
                self.page_count += 1;
                let first = trunk
                    .data_page(0)
                    .ok_or_else(|| CoreError::internal("new trunk has no data pages"))?;
                self.trunk = Some(trunk);
                self.trunk_index = 1;
                first
            }
        };
        let key = self.next_key - 1;
        self.data = Some(LogStreamData::new(
            next,
            self.trunk_page_id,
            key,
            self.page_size,
        ));
        self.page_count += 1;
        Ok(())
    }

    /// Appends `bytes`, moving to new data pages (and trunks) as pages fill.
    pub fn write(
        &mut self,
        store: &mut dyn LogStore,
        bytes: &[u8],
        exclude: &BitField,
    ) -> CoreResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.reserve(store, bytes.len(), exclude)?;
        let mut rest = bytes;
        while !rest.is_empty() {
            let data = self.current_data()?;
            let n = data.write(rest);
            if n < rest.len() {
                self.store_page(store)?;
                self.init_next_data(store)?;
            }
            self.reserved = self.reserved.saturating_sub(n);
            rest = &rest[n..];
        }
        self.need_flush = true;
        Ok(())
    }

    /// Closes the current data page, leaving the rest of it zero, and moves
    /// to the next one.
    pub fn fill_page(&mut self, store: &mut dyn LogStore, exclude: &BitField) -> CoreResult<()> {
        let remaining = self.current_data()?.remaining();
        self.reserve(store, remaining + 1, exclude)?;
        self.reserved = self.reserved.saturating_sub(remaining);
        self.store_page(store)?;
        self.init_next_data(store)
    }

    /// Writes the current data page if it has unwritten bytes.
    pub fn flush(&mut self, store: &mut dyn LogStore) -> CoreResult<()> {
        if self.need_flush {
            self.store_page(store)?;
        }
        Ok(())
    }

    fn store_page(&mut self, store: &mut dyn LogStore) -> CoreResult<()> {
        let data = self.current_data()?;
        let bytes = data.encode();
        let id = data.page_id();
        store.write_page(id, &bytes)?;
        self.need_flush = false;
        Ok(())
    }

    fn current_data(&mut self) -> CoreResult<&mut LogStreamData> {
        self.data
            .as_mut()
            .ok_or_else(|| CoreError::internal("log stream has no data page"))
    }

    /// Returns reserved pages not yet handed to a trunk.
    pub fn free_reserved(&mut self, store: &mut dyn LogStore) -> CoreResult<()> {
        for id in std::mem::take(&mut self.reserved_pages) {
            store.free_page(id)?;
        }
        self.reserved = 0;
        Ok(())
    }

    /// Releases a trunk and all of its data pages.
    pub fn free_trunk(&mut self, store: &mut dyn LogStore, trunk: &LogStreamTrunk) -> CoreResult<()> {
        store.free_page(trunk.page_id())?;
        for &id in trunk.page_ids() {
            store.free_page(id)?;
        }
        self.page_count = self
            .page_count
            .saturating_sub(1 + trunk.page_ids().len() as u64);
        Ok(())
    }

    /// Bytes of pages the stream currently occupies.
    pub fn size(&self) -> u64 {
        self.page_count * self.page_size as u64
    }

    /// The data page being written.
    pub fn current_data_page_id(&self) -> PageId {
        self.data.as_ref().map_or(0, LogStreamData::page_id)
    }

    /// The lowest page id the stream allocates from when opened at the end.
    pub fn min_page_id(&self) -> PageId {
        self.min_page_id
    }

    /// Highest log key stamped on a trunk so far.
    pub fn last_key(&self) -> u32 {
        self.next_key.saturating_sub(1)
    }
}

/// Reader side of the log stream.
#[derive(Debug)]
pub struct LogStreamReader {
    log_key: u32,
    first_trunk: PageId,
    trunks: TrunkIterator,
    trunk: Option<LogStreamTrunk>,
    trunk_index: usize,
    expected_key: Option<u32>,
    skip_to: Option<PageId>,
    data: Option<LogStreamData>,
    data_pos: usize,
    end_of_stream: bool,
}

impl LogStreamReader {
    /// Starts reading the chain at `first_trunk`, whose key is `log_key`,
    /// from data page `first_data` (0 reads from the first data page).
    pub fn new(log_key: u32, first_trunk: PageId, first_data: PageId) -> Self {
        Self {
            log_key,
            first_trunk,
            trunks: TrunkIterator::new(first_trunk),
            trunk: None,
            trunk_index: 0,
            expected_key: Some(log_key),
            skip_to: (first_data != 0).then_some(first_data),
            data: None,
            data_pos: 0,
            end_of_stream: first_trunk == 0,
        }
    }

    /// Reads one byte, or `None` at the end of the stream.
    pub fn read_byte(&mut self, store: &dyn LogStore) -> CoreResult<Option<u8>> {
        loop {
            if let Some(data) = &self.data {
                if let Some(&b) = data.payload().get(self.data_pos) {
                    self.data_pos += 1;
                    return Ok(Some(b));
                }
            }
            if !self.fill_buffer(store)? {
                return Ok(None);
            }
        }
    }

    /// Reads up to `buf.len()` bytes; returns how many were read.
    pub fn read(&mut self, store: &dyn LogStore, buf: &mut [u8]) -> CoreResult<usize> {
        let mut done = 0;
        while done < buf.len() {
            let available = match &self.data {
                Some(data) => &data.payload()[self.data_pos.min(data.payload().len())..],
                None => &[][..],
            };
            if available.is_empty() {
                if !self.fill_buffer(store)? {
                    break;
                }
                continue;
            }
            let n = available.len().min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&available[..n]);
            self.data_pos += n;
            done += n;
        }
        Ok(done)
    }

    /// The data page the last byte came from.
    pub fn data_page(&self) -> PageId {
        self.data.as_ref().map_or(0, LogStreamData::page_id)
    }

    /// Reads the next log record, or `None` at the end of the stream.
    pub fn next_record(&mut self, store: &dyn LogStore) -> CoreResult<Option<LogRecord>> {
        let page_size = store.page_size();
        LogRecord::read_from(&mut BoundReader { reader: self, store }, page_size)
    }

    fn fill_buffer(&mut self, store: &dyn LogStore) -> CoreResult<bool> {
        if self.end_of_stream {
            return Ok(false);
        }
        let next = loop {
            if self.trunk.is_none() {
                match self.trunks.next(store)? {
                    Some(trunk) if Some(trunk.log_key()) == self.expected_key => {
                        self.expected_key = trunk.log_key().checked_add(1);
                        self.trunk = Some(trunk);
                        self.trunk_index = 0;
                    }
                    _ => return Ok(self.end()),
                }
            }
            let Some(trunk) = &self.trunk else {
                return Ok(self.end());
            };
            match trunk.data_page(self.trunk_index) {
                None => self.trunk = None,
                Some(id) => {
                    self.trunk_index += 1;
                    if self.skip_to.is_none_or(|first| first == id) {
                        break id;
                    }
                }
            }
        };
        let (trunk_id, key) = match &self.trunk {
            Some(t) => (t.page_id(), t.log_key()),
            None => return Ok(self.end()),
        };
        if next >= store.page_count() {
            return Ok(self.end());
        }
        let page = match Page::decode(next, &store.read_page(next)?) {
            Ok(page) => page,
            Err(CoreError::PageCorrupted { .. }) => return Ok(self.end()),
            Err(e) => return Err(e),
        };
        match page {
            Page::Data(data) if data.log_key() == key && data.trunk() == trunk_id => {
                self.skip_to = None;
                self.data = Some(data);
                self.data_pos = 0;
                Ok(true)
            }
            _ => Ok(self.end()),
        }
    }

    fn end(&mut self) -> bool {
        self.end_of_stream = true;
        false
    }

    /// Marks every page of the chain used in the store and returns them,
    /// with the highest trunk key seen.
    ///
    /// A page that ends the chain is marked too when it is empty or a
    /// stream page: it is the next trunk the writer had reserved.
    pub fn allocate_all_pages(
        &self,
        store: &mut dyn LogStore,
    ) -> CoreResult<(BitField, Option<u32>)> {
        let mut pages = BitField::new();
        let mut last_key = None;
        let mut key = Some(self.log_key);
        let mut it = TrunkIterator::new(self.first_trunk);
        loop {
            let trunk = it.next(&*store)?;
            if it.can_delete() {
                store.allocate_page_at(it.current_page_id())?;
            }
            let Some(trunk) = trunk.filter(|t| Some(t.log_key()) == key) else {
                break;
            };
            last_key = key;
            key = trunk.log_key().checked_add(1);
            pages.set(trunk.page_id() as usize);
            for &id in trunk.page_ids() {
                pages.set(id as usize);
                store.allocate_page_at(id)?;
            }
        }
        Ok((pages, last_key))
    }
}

/// A reader bound to its store, so records can decode straight off the
/// page chain.
struct BoundReader<'a> {
    reader: &'a mut LogStreamReader,
    store: &'a dyn LogStore,
}

impl ByteSource for BoundReader<'_> {
    type Error = CoreError;

    fn read_byte(&mut self) -> CoreResult<Option<u8>> {
        self.reader.read_byte(self.store)
    }

    fn read_fully(&mut self, buf: &mut [u8]) -> CoreResult<()> {
        if self.reader.read(self.store, buf)? < buf.len() {
            return Err(CodecError::UnexpectedEof.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::PageStore;

    const PAGE: usize = 64;

    fn store() -> PageStore {
        PageStore::in_memory(&StoreConfig::new().page_size(PAGE)).unwrap()
    }

    fn open(store: &mut PageStore, key: u32) -> (LogPageStream, PageId) {
        let first = store.allocate_page(&BitField::new()).unwrap();
        let stream =
            LogPageStream::open_for_write(store, first, key, false, 1, &BitField::new()).unwrap();
        (stream, first)
    }

    fn read_all(store: &PageStore, key: u32, first: PageId, first_data: PageId) -> Vec<u8> {
        let mut reader = LogStreamReader::new(key, first, first_data);
        let mut out = Vec::new();
        while let Some(b) = reader.read_byte(store).unwrap() {
            out.push(b);
        }
        out
    }

    #[test]
    fn open_writes_first_trunk() {
        let mut store = store();
        let (stream, first) = open(&mut store, 1);
        let Page::Trunk(trunk) = Page::decode(first, &store.read_page(first).unwrap()).unwrap()
        else {
            panic!("expected trunk");
        };
        assert_eq!(trunk.log_key(), 1);
        assert_eq!(trunk.parent(), 0);
        assert_eq!(trunk.page_ids().len(), LogStreamTrunk::pages_addressed(PAGE));
        assert_eq!(stream.current_data_page_id(), trunk.page_ids()[0]);
        assert_eq!(stream.size(), 2 * PAGE as u64);
    }

    #[test]
    fn bytes_span_pages_and_trunks() {
        let mut store = store();
        let (mut stream, first) = open(&mut store, 5);
        let payload: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8 + 1).collect();
        stream.write(&mut store, &payload, &BitField::new()).unwrap();
        stream.flush(&mut store).unwrap();
        assert!(stream.last_key() > 5);

        let read = read_all(&store, 5, first, 0);
        assert_eq!(&read[..payload.len()], &payload[..]);
        assert!(read[payload.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn unflushed_page_is_not_visible() {
        let mut store = store();
        let (mut stream, first) = open(&mut store, 1);
        stream.write(&mut store, b"xyz", &BitField::new()).unwrap();
        assert!(read_all(&store, 1, first, 0).is_empty());
        stream.flush(&mut store).unwrap();
        assert_eq!(&read_all(&store, 1, first, 0)[..3], b"xyz");
    }

    #[test]
    fn fill_page_moves_to_next_page() {
        let mut store = store();
        let (mut stream, first) = open(&mut store, 1);
        stream.write(&mut store, b"ab", &BitField::new()).unwrap();
        let before = stream.current_data_page_id();
        stream.fill_page(&mut store, &BitField::new()).unwrap();
        assert_ne!(stream.current_data_page_id(), before);
        stream.write(&mut store, b"cd", &BitField::new()).unwrap();
        stream.flush(&mut store).unwrap();
        let read = read_all(&store, 1, first, 0);
        let capacity = LogStreamData::capacity(PAGE);
        assert_eq!(&read[..2], b"ab");
        assert_eq!(&read[capacity..capacity + 2], b"cd");
    }

    #[test]
    fn reader_skips_to_first_data_page() {
        let mut store = store();
        let (mut stream, first) = open(&mut store, 1);
        stream.write(&mut store, b"old", &BitField::new()).unwrap();
        stream.fill_page(&mut store, &BitField::new()).unwrap();
        let second = stream.current_data_page_id();
        stream.write(&mut store, b"new", &BitField::new()).unwrap();
        stream.flush(&mut store).unwrap();
        assert_eq!(&read_all(&store, 1, first, second)[..3], b"new");
    }

    #[test]
    fn wrong_key_ends_stream() {
        let mut store = store();
        let (mut stream, first) = open(&mut store, 3);
        stream.write(&mut store, b"abc", &BitField::new()).unwrap();
        stream.flush(&mut store).unwrap();
        assert!(read_all(&store, 2, first, 0).is_empty());
        assert!(read_all(&store, 4, first, 0).is_empty());
    }

    #[test]
    fn corrupted_data_page_ends_stream() {
        let mut store = store();
        let (mut stream, first) = open(&mut store, 1);
        stream.write(&mut store, &[9; 100], &BitField::new()).unwrap();
        stream.flush(&mut store).unwrap();
        let page = stream.current_data_page_id();
        let mut bytes = store.read_page(page).unwrap();
        bytes[20] ^= 0xFF;
        store.write_page(page, &bytes).unwrap();
        let read = read_all(&store, 1, first, 0);
        assert_eq!(read.len(), LogStreamData::capacity(PAGE));
    }

    #[test]
    fn read_fills_buffers_across_pages() {
        let mut store = store();
        let (mut stream, first) = open(&mut store, 1);
        let payload: Vec<u8> = (1..=150u8).collect();
        stream.write(&mut store, &payload, &BitField::new()).unwrap();
        stream.flush(&mut store).unwrap();
        let mut reader = LogStreamReader::new(1, first, 0);
        let mut buf = vec![0u8; 150];
        assert_eq!(reader.read(&store, &mut buf).unwrap(), 150);
        assert_eq!(buf, payload);
    }

    #[test]
    fn allocate_all_pages_marks_chain() {
        let mut store = store();
        let (mut stream, first) = open(&mut store, 1);
        stream.write(&mut store, &[1; 1000], &BitField::new()).unwrap();
        stream.flush(&mut store).unwrap();
        let reader = LogStreamReader::new(1, first, 0);
        let (pages, last_key) = reader.allocate_all_pages(&mut store).unwrap();
        assert!(pages.get(first as usize));
        assert_eq!(last_key, Some(stream.last_key()));
        for id in pages.iter() {
            assert!(store.is_used(id as PageId));
        }
    }

    #[test]
    fn free_reserved_and_trunk() {
        let mut store = store();
        let (mut stream, first) = open(&mut store, 1);
        let Page::Trunk(trunk) = Page::decode(first, &store.read_page(first).unwrap()).unwrap()
        else {
            panic!("expected trunk");
        };
        stream.free_reserved(&mut store).unwrap();
        stream.free_trunk(&mut store, &trunk).unwrap();
        assert!(!store.is_used(first));
        assert!(trunk.page_ids().iter().all(|&id| !store.is_used(id)));
    }

    #[test]
    fn trunk_iterator_stops_on_revisit() {
        let mut store = store();
        let looping = LogStreamTrunk::new(5, 0, 1, 5, vec![]);
        store.allocate_page_at(5).unwrap();
        store.write_page(5, &looping.encode(PAGE).unwrap()).unwrap();
        let mut it = TrunkIterator::new(5);
        assert!(it.next(&store).unwrap().is_some());
        assert!(it.next(&store).unwrap().is_none());
    }

    #[test]
    fn trunk_iterator_checks_parent() {
        let mut store = store();
        store.allocate_page_at(5).unwrap();
        store.allocate_page_at(6).unwrap();
        let a = LogStreamTrunk::new(5, 0, 1, 6, vec![]);
        let stale = LogStreamTrunk::new(6, 9, 2, 0, vec![]);
        store.write_page(5, &a.encode(PAGE).unwrap()).unwrap();
        store.write_page(6, &stale.encode(PAGE).unwrap()).unwrap();
        let mut it = TrunkIterator::new(5);
        assert!(it.next(&store).unwrap().is_some());
        assert!(it.next(&store).unwrap().is_none());
        assert!(it.can_delete());
        assert_eq!(it.current_page_id(), 6);
    }

    #[test]
    fn highest_key_ends_the_chain() {
        let mut store = store();
        for id in 5..=7 {
            store.allocate_page_at(id).unwrap();
        }
        let last = LogStreamTrunk::new(5, 0, u32::MAX, 7, vec![6]);
        let mut data = LogStreamData::new(6, 5, u32::MAX, PAGE);
        data.write(b"abc");
        let wrapped = LogStreamTrunk::new(7, 5, 0, 0, vec![]);
        store.write_page(5, &last.encode(PAGE).unwrap()).unwrap();
        store.write_page(6, &data.encode()).unwrap();
        store.write_page(7, &wrapped.encode(PAGE).unwrap()).unwrap();

        let read = read_all(&store, u32::MAX, 5, 0);
        assert_eq!(&read[..3], b"abc");
        assert_eq!(read.len(), LogStreamData::capacity(PAGE));

        let reader = LogStreamReader::new(u32::MAX, 5, 0);
        let (pages, last_key) = reader.allocate_all_pages(&mut store).unwrap();
        assert_eq!(last_key, Some(u32::MAX));
        assert!(pages.get(5) && pages.get(6));
        assert!(!pages.get(7));
    }

    #[test]
    fn writer_refuses_exhausted_key() {
        let mut store = store();
        let first = store.allocate_page(&BitField::new()).unwrap();
        let err =
            LogPageStream::open_for_write(&mut store, first, u32::MAX, false, 1, &BitField::new())
                .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }
}
