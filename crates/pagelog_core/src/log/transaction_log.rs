//! The transaction log.
//!
//! Records go to a [`LogPageStream`]. Before a page is changed in the store,
//! its before-image is logged as an UNDO record, once per section. Row
//! operations are logged as ADD / REMOVE / TRUNCATE and become effective
//! when their session's COMMIT is in the log.
//!
//! A checkpoint ends a section. Sections older than the oldest uncommitted
//! work can be dropped with [`TransactionLog::remove_until`], which logs the
//! pages it releases as FREE_LOG records.
//!
//! Recovery reads the log three times:
//!
//! 1. **Undo**: restores the first before-image of every page, notes
//!    commits and prepared transactions.
//! 2. **Allocate**: marks the log's own pages used.
//! 3. **Redo**: replays committed row operations and releases pages named
//!    by FREE_LOG records.

use std::collections::BTreeMap;

use pagelog_codec::{DataWriter, Row};
use tracing::{debug, trace, warn};

use crate::bitset::BitField;
use crate::config::LogConfig;
use crate::error::{CoreError, CoreResult};
use crate::log::record::{LogRecord, UndoImage};
use crate::log::session::{InDoubtState, InDoubtTransaction, Session, SessionState};
use crate::log::stream::{LogPageStream, LogStreamReader};
use crate::page::{LogStreamData, Page, TrunkIterator};
use crate::store::LogStore;
use crate::types::{LogPosition, PageId, SessionId, TableId};

/// A recovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecoveryStage {
    /// Restore page before-images.
    Undo,
    /// Mark the log's pages used.
    Allocate,
    /// Replay committed row operations.
    Redo,
}

impl RecoveryStage {
    fn previous(self) -> Option<RecoveryStage> {
        match self {
            RecoveryStage::Undo => None,
            RecoveryStage::Allocate => Some(RecoveryStage::Undo),
            RecoveryStage::Redo => Some(RecoveryStage::Allocate),
        }
    }
}

/// Counters collected while recovering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Records read in the undo pass, padding excluded.
    pub records: u64,
    /// Pages restored from UNDO records.
    pub pages_undone: u64,
    /// UNDO records skipped because the page was already restored.
    pub undo_skipped: u64,
    /// Row operations replayed.
    pub rows_redone: u64,
    /// Row operations of uncommitted sessions.
    pub rows_ignored: u64,
    /// Pages owned by the log.
    pub log_pages: u64,
    /// Pages released by FREE_LOG records.
    pub pages_freed: u64,
    /// Prepared transactions left in doubt.
    pub in_doubt: u64,
}

/// Why a record scan stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEnd {
    /// The stream ended cleanly.
    EndOfStream,
    /// A corrupt or torn record ended the scan.
    Corrupted(String),
}

/// A record read by [`TransactionLog::records`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedRecord {
    /// Section (counted from the scan start) and record ordinal.
    pub pos: LogPosition,
    /// Data page the record ends on.
    pub data_page: PageId,
    /// The record.
    pub record: LogRecord,
}

/// Result of [`TransactionLog::records`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordScan {
    /// Records in log order, padding excluded.
    pub records: Vec<ScannedRecord>,
    /// How the scan ended.
    pub end: ScanEnd,
}

/// The write-ahead log of a page store.
///
/// The log borrows its store per call; it never holds on to it.
#[derive(Debug)]
pub struct TransactionLog {
    config: LogConfig,
    log_key: u32,
    last_key: u32,
    first_trunk_page: PageId,
    first_data_page: PageId,
    stream: Option<LogPageStream>,
    write_buffer: DataWriter,
    log_section_id: u32,
    log_pos: u32,
    first_section_id: u32,
    section_pages: BTreeMap<u32, PageId>,
    /// Pages undo-logged in the current section.
    undo: BitField,
    /// Pages undo-logged since the log was opened.
    undo_all: BitField,
    used_log_pages: Option<BitField>,
    session_states: BTreeMap<SessionId, SessionState>,
    in_doubt: Vec<InDoubtTransaction>,
    reading: bool,
    recovery: Option<RecoveryStage>,
    stats: RecoveryStats,
    freeing: bool,
    failed: bool,
}

impl TransactionLog {
    /// Creates a closed log.
    pub fn new(config: LogConfig) -> Self {
        Self {
            config,
            log_key: 0,
            last_key: 0,
            first_trunk_page: 0,
            first_data_page: 0,
            stream: None,
            write_buffer: DataWriter::new(),
            log_section_id: 0,
            log_pos: 0,
            first_section_id: 0,
            section_pages: BTreeMap::new(),
            undo: BitField::new(),
            undo_all: BitField::new(),
            used_log_pages: None,
            session_states: BTreeMap::new(),
            in_doubt: Vec::new(),
            reading: false,
            recovery: None,
            stats: RecoveryStats::default(),
            freeing: false,
            failed: false,
        }
    }

    /// The configuration.
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Starts a new stream at `first_trunk` and records it in the store's
    /// log header.
    ///
    /// The stream's key is one above any key this log has written or read,
    /// so pages of older streams never pass for pages of this one.
    pub fn open_for_writing(
        &mut self,
        store: &mut dyn LogStore,
        first_trunk: PageId,
        at_end: bool,
    ) -> CoreResult<()> {
        if self.stream.is_some() {
            return Err(CoreError::invalid_operation("log is already open for writing"));
        }
        let key = self
            .last_key
            .checked_add(1)
            .ok_or_else(|| CoreError::invalid_operation("log keys exhausted"))?;
        debug!(key, first_trunk, at_end, "opening log for writing");
        let stream = LogPageStream::open_for_write(
            store,
            first_trunk,
            key,
            at_end,
            self.config.reserve_bytes,
            &self.undo_all,
        )?;
        self.log_key = key;
        self.last_key = key;
        self.first_trunk_page = first_trunk;
        self.first_data_page = stream.current_data_page_id();
        self.stream = Some(stream);
        self.reading = false;
        self.recovery = None;
        self.failed = false;
        self.log_pos = 0;
        self.section_pages.clear();
        self.first_section_id = self.log_section_id;
        self.section_pages
            .insert(self.log_section_id, self.first_data_page);
        store.set_log_first_page(key, first_trunk, self.first_data_page)?;
        self.log_pending_undo(store)?;
        Ok(())
    }

    /// Prepares to recover the stream described by a log header.
    pub fn open_for_reading(
        &mut self,
        log_key: u32,
        first_trunk: PageId,
        first_data: PageId,
    ) -> CoreResult<()> {
        if self.stream.is_some() {
            return Err(CoreError::invalid_operation("log is open for writing"));
        }
        debug!(log_key, first_trunk, first_data, "opening log for reading");
        self.log_key = log_key;
        self.last_key = self.last_key.max(log_key);
        self.first_trunk_page = first_trunk;
        self.first_data_page = first_data;
        self.reading = true;
        self.recovery = None;
        self.stats = RecoveryStats::default();
        self.session_states.clear();
        self.in_doubt.clear();
        self.undo.clear_all();
        self.used_log_pages = None;
        Ok(())
    }

    /// Runs one recovery pass. Passes must run in order, each once.
    pub fn recover(&mut self, store: &mut dyn LogStore, stage: RecoveryStage) -> CoreResult<()> {
        if !self.reading || self.stream.is_some() {
            return Err(CoreError::invalid_operation(
                "recovery needs a log opened for reading",
            ));
        }
        if self.recovery != stage.previous() {
            return Err(CoreError::invalid_operation(format!(
                "recovery stage {stage:?} after {:?}",
                self.recovery
            )));
        }
        debug!(?stage, key = self.log_key, "recovering");
        match stage {
            RecoveryStage::Allocate => self.allocate_log_pages(store)?,
            RecoveryStage::Undo | RecoveryStage::Redo => self.replay(store, stage)?,
        }
        // Allocator pages touched by recovery are not logged.
        store.take_pending_undo();
        self.undo.clear_all();
        if stage == RecoveryStage::Undo {
            self.in_doubt = self
                .session_states
                .values()
                .filter_map(|s| s.in_doubt.clone())
                .collect();
            self.stats.in_doubt = self.in_doubt.len() as u64;
        }
        if stage == RecoveryStage::Redo {
            self.used_log_pages = None;
            debug!(stats = ?self.stats, "recovery complete");
        }
        self.recovery = Some(stage);
        Ok(())
    }

    /// Runs all three recovery passes.
    pub fn recover_all(&mut self, store: &mut dyn LogStore) -> CoreResult<RecoveryStats> {
        self.recover(store, RecoveryStage::Undo)?;
        self.recover(store, RecoveryStage::Allocate)?;
        self.recover(store, RecoveryStage::Redo)?;
        Ok(self.stats)
    }

    /// Drops the per-session state recovery built up. In-doubt
    /// transactions stay listed.
    pub fn recover_end(&mut self) {
        self.session_states.clear();
    }

    fn allocate_log_pages(&mut self, store: &mut dyn LogStore) -> CoreResult<()> {
        let reader = LogStreamReader::new(self.log_key, self.first_trunk_page, self.first_data_page);
        let (pages, last_key) = reader.allocate_all_pages(store)?;
        if let Some(key) = last_key {
            self.last_key = self.last_key.max(key);
        }
        self.stats.log_pages = pages.count_ones() as u64;
        self.used_log_pages = Some(pages);
        Ok(())
    }

    fn replay(&mut self, store: &mut dyn LogStore, stage: RecoveryStage) -> CoreResult<()> {
        let mut reader =
            LogStreamReader::new(self.log_key, self.first_trunk_page, self.first_data_page);
        let mut log_id = 0u32;
        let mut pos = 0u32;
        loop {
            let (record, page) = match read_replayable(&mut reader, &*store) {
                Ok(Some(next)) => next,
                Ok(None) => break,
                Err(e) if e.is_end_of_log() => {
                    debug!(error = %e, page = reader.data_page(), "log ends");
                    break;
                }
                Err(e) => return Err(e),
            };
            pos += 1;
            if matches!(record, LogRecord::Noop) {
                continue;
            }
            trace!(%record, log_id, pos, "replaying");
            match (stage, record) {
                (_, LogRecord::Checkpoint) => log_id += 1,
                (RecoveryStage::Undo, record) => {
                    self.stats.records += 1;
                    self.replay_undo(store, record, page, log_id, pos, reader.data_page())?;
                }
                (_, record) => self.replay_redo(store, record, log_id, pos)?,
            }
        }
        Ok(())
    }

    fn replay_undo(
        &mut self,
        store: &mut dyn LogStore,
        record: LogRecord,
        page: Option<Vec<u8>>,
        log_id: u32,
        pos: u32,
        data_page: PageId,
    ) -> CoreResult<()> {
        match record {
            LogRecord::Undo { page_id, .. } => {
                if self.undo.get(page_id as usize) {
                    trace!(page_id, "undo already applied");
                    self.stats.undo_skipped += 1;
                    return Ok(());
                }
                let page = page.ok_or_else(|| {
                    CoreError::internal(format!("undo record for page {page_id} has no image"))
                })?;
                debug!(page_id, "undo");
                store.write_page(page_id, &page)?;
                self.undo.set(page_id as usize);
                self.undo_all.set(page_id as usize);
                self.stats.pages_undone += 1;
            }
            LogRecord::Add { table_id, row, .. } => {
                store.allocate_if_index_root(pos, table_id, &row)?;
            }
            LogRecord::PrepareCommit {
                session_id,
                transaction,
            } => {
                debug!(%session_id, %transaction, data_page, "prepared transaction");
                self.session_states.entry(session_id).or_default().in_doubt =
                    Some(InDoubtTransaction::new(session_id, data_page, transaction));
            }
            LogRecord::Commit { session_id } => {
                let state = self.session_states.entry(session_id).or_default();
                state.last_commit = Some((log_id, pos));
                state.in_doubt = None;
            }
            _ => {}
        }
        Ok(())
    }

    fn replay_redo(
        &mut self,
        store: &mut dyn LogStore,
        record: LogRecord,
        log_id: u32,
        pos: u32,
    ) -> CoreResult<()> {
        if let LogRecord::FreeLog { page_ids } = &record {
            for &id in page_ids {
                let in_use = self
                    .used_log_pages
                    .as_ref()
                    .is_some_and(|used| used.get(id as usize));
                if !in_use {
                    trace!(page_id = id, "freeing old log page");
                    store.free_page(id)?;
                    self.stats.pages_freed += 1;
                }
            }
            return Ok(());
        }
        let (session_id, table_id) = match &record {
            LogRecord::Add {
                session_id,
                table_id,
                ..
            }
            | LogRecord::Remove {
                session_id,
                table_id,
                ..
            }
            | LogRecord::Truncate {
                session_id,
                table_id,
            } => (*session_id, *table_id),
            _ => return Ok(()),
        };
        let committed = self
            .session_states
            .get(&session_id)
            .is_some_and(|s| s.is_committed(log_id, pos));
        if !committed {
            trace!(%session_id, %table_id, log_id, pos, "ignoring uncommitted operation");
            self.stats.rows_ignored += 1;
            return Ok(());
        }
        match record {
            LogRecord::Add { row, .. } => store.redo(table_id, row, true)?,
            LogRecord::Remove { key, .. } => store.redo_delete(table_id, key)?,
            _ => store.redo_truncate(table_id)?,
        }
        self.stats.rows_redone += 1;
        Ok(())
    }

    fn ensure_writable(&self) -> CoreResult<()> {
        if self.failed {
            return Err(CoreError::LogUnusable);
        }
        if self.stream.is_none() {
            return Err(CoreError::invalid_operation("log is not open for writing"));
        }
        Ok(())
    }

    fn stream_mut(&mut self) -> CoreResult<&mut LogPageStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| CoreError::invalid_operation("log is not open for writing"))
    }

    /// Marks the log unusable if `result` is an error.
    fn poison<T>(&mut self, result: CoreResult<T>) -> CoreResult<T> {
        if let Err(e) = &result {
            warn!(error = %e, "log write failed");
            self.failed = true;
        }
        result
    }

    fn write_record(&mut self, store: &mut dyn LogStore, record: &LogRecord) -> CoreResult<()> {
        self.ensure_writable()?;
        self.write_buffer.clear();
        record.encode(&mut self.write_buffer);
        let result = match self.stream.as_mut() {
            Some(stream) => stream.write(store, self.write_buffer.as_bytes(), &self.undo_all),
            None => Err(CoreError::invalid_operation("log is not open for writing")),
        };
        self.poison(result)
    }

    fn append(&mut self, store: &mut dyn LogStore, record: &LogRecord) -> CoreResult<()> {
        self.write_record(store, record)?;
        self.log_pending_undo(store)?;
        Ok(())
    }

    /// Logs the before-images the store queued while allocating. Returns
    /// whether anything was written.
    fn log_pending_undo(&mut self, store: &mut dyn LogStore) -> CoreResult<bool> {
        let mut wrote = false;
        loop {
            let pending = store.take_pending_undo();
            if pending.is_empty() {
                return Ok(wrote);
            }
            if self.freeing || self.stream.is_none() {
                continue;
            }
            for (page_id, image) in pending {
                wrote |= self.write_undo(store, page_id, &image)?;
            }
        }
    }

    fn write_undo(
        &mut self,
        store: &mut dyn LogStore,
        page_id: PageId,
        image: &[u8],
    ) -> CoreResult<bool> {
        if self.undo.get(page_id as usize) {
            return Ok(false);
        }
        if image.len() != store.page_size() {
            return Err(CoreError::internal(format!(
                "undo image of page {page_id} has {} bytes, page size is {}",
                image.len(),
                store.page_size()
            )));
        }
        let image = UndoImage::from_page(image, &*store, self.config.compress_undo);
        trace!(page_id, len = image.stored_len(), "undo logged");
        self.undo.set(page_id as usize);
        self.undo_all.set(page_id as usize);
        self.write_record(store, &LogRecord::Undo { page_id, image })?;
        Ok(true)
    }

    /// Logs the before-image of `page_id` unless it was already logged in
    /// this section. Must be called before the page is overwritten.
    pub fn add_undo(
        &mut self,
        store: &mut dyn LogStore,
        page_id: PageId,
        image: &[u8],
    ) -> CoreResult<()> {
        if self.freeing || self.undo.get(page_id as usize) {
            return Ok(());
        }
        self.ensure_writable()?;
        self.write_undo(store, page_id, image)?;
        self.log_pending_undo(store)?;
        Ok(())
    }

    /// Logs a row insert (`add`) or delete and returns its position, which
    /// is also noted on the session.
    pub fn log_add_or_remove(
        &mut self,
        store: &mut dyn LogStore,
        session: &mut Session,
        table_id: TableId,
        row: &Row,
        add: bool,
    ) -> CoreResult<LogPosition> {
        self.ensure_writable()?;
        let session_id = session.id();
        let record = if add {
            LogRecord::Add {
                session_id,
                table_id,
                row: row.clone(),
            }
        } else {
            LogRecord::Remove {
                session_id,
                table_id,
                key: row.key(),
            }
        };
        self.log_pos += 1;
        self.append(store, &record)?;
        let pos = LogPosition::new(self.log_section_id, self.log_pos);
        session.add_log_pos(pos);
        Ok(pos)
    }

    /// Logs a table truncate.
    pub fn log_truncate(
        &mut self,
        store: &mut dyn LogStore,
        session: &mut Session,
        table_id: TableId,
    ) -> CoreResult<LogPosition> {
        self.ensure_writable()?;
        self.log_pos += 1;
        self.append(
            store,
            &LogRecord::Truncate {
                session_id: session.id(),
                table_id,
            },
        )?;
        let pos = LogPosition::new(self.log_section_id, self.log_pos);
        session.add_log_pos(pos);
        Ok(pos)
    }

    /// Logs a commit, flushing if the configuration asks for it.
    ///
    /// Does nothing when the log is closed.
    pub fn commit(&mut self, store: &mut dyn LogStore, session_id: SessionId) -> CoreResult<()> {
        if self.stream.is_none() {
            debug!(%session_id, "commit on closed log ignored");
            return Ok(());
        }
        self.append(store, &LogRecord::Commit { session_id })?;
        if self.config.flush_on_commit {
            self.flush(store)?;
        }
        Ok(())
    }

    /// Logs the first phase of a two-phase commit.
    ///
    /// The record gets a data page of its own, so it can later be replaced
    /// in place by [`TransactionLog::set_in_doubt_state`]. A name too long
    /// for one page is rejected before anything is written.
    pub fn prepare_commit(
        &mut self,
        store: &mut dyn LogStore,
        session: &Session,
        transaction: &str,
    ) -> CoreResult<()> {
        self.ensure_writable()?;
        let record = LogRecord::PrepareCommit {
            session_id: session.id(),
            transaction: transaction.to_owned(),
        };
        let len = record.to_bytes().len();
        let capacity = LogStreamData::capacity(store.page_size());
        if len > capacity {
            return Err(CoreError::invalid_value(format!(
                "prepared transaction name needs {len} bytes, a log page holds {capacity}"
            )));
        }
        self.log_pending_undo(store)?;
        loop {
            self.fill_page(store)?;
            if !self.log_pending_undo(store)? {
                break;
            }
        }
        self.write_record(store, &record)?;
        self.fill_page(store)?;
        self.log_pending_undo(store)?;
        if self.config.flush_on_commit {
            self.flush(store)?;
        }
        Ok(())
    }

    fn fill_page(&mut self, store: &mut dyn LogStore) -> CoreResult<()> {
        let result = match self.stream.as_mut() {
            Some(stream) => stream.fill_page(store, &self.undo_all),
            None => Err(CoreError::invalid_operation("log is not open for writing")),
        };
        self.poison(result)
    }

    /// Ends the current section.
    ///
    /// The next section starts on a fresh data page, and its first
    /// change to any page is undo-logged again.
    pub fn checkpoint(&mut self, store: &mut dyn LogStore) -> CoreResult<()> {
        self.write_record(store, &LogRecord::Checkpoint)?;
        self.undo.clear_all();
        self.log_section_id += 1;
        self.log_pos = 0;
        let result = self.stream_mut()?.flush(store);
        self.poison(result)?;
        self.fill_page(store)?;
        let first_page = self.stream_mut()?.current_data_page_id();
        self.section_pages.insert(self.log_section_id, first_page);
        debug!(section = self.log_section_id, first_page, "checkpoint");
        self.log_pending_undo(store)?;
        Ok(())
    }

    /// Releases the trunks holding only sections before
    /// `first_uncommitted_section`.
    ///
    /// Released pages are listed in FREE_LOG records first, then the log
    /// header is moved to the trunk holding the section's first page, and
    /// only then are the pages returned to the store.
    pub fn remove_until(
        &mut self,
        store: &mut dyn LogStore,
        first_uncommitted_section: u32,
    ) -> CoreResult<()> {
        if first_uncommitted_section <= self.first_section_id {
            return Ok(());
        }
        self.ensure_writable()?;
        let keep = *self
            .section_pages
            .get(&first_uncommitted_section)
            .ok_or_else(|| {
                CoreError::internal(format!(
                    "no first page recorded for section {first_uncommitted_section}"
                ))
            })?;
        let mut released = Vec::new();
        let mut trunk_id = self.first_trunk_page;
        let key = loop {
            let trunk = match Page::decode(trunk_id, &store.read_page(trunk_id)?)? {
                Page::Trunk(trunk) => trunk,
                other => {
                    return Err(CoreError::internal(format!(
                        "expected a log trunk at page {trunk_id}, found {}",
                        other.kind_name()
                    )))
                }
            };
            if trunk.contains(keep) {
                break trunk.log_key();
            }
            trunk_id = trunk.next_trunk();
            released.push(trunk);
        };
        for trunk in &released {
            let mut page_ids = Vec::with_capacity(trunk.page_ids().len() + 1);
            page_ids.push(trunk.page_id());
            page_ids.extend_from_slice(trunk.page_ids());
            self.append(store, &LogRecord::FreeLog { page_ids })?;
        }
        self.flush(store)?;
        debug!(
            section = first_uncommitted_section,
            trunks = released.len(),
            first_trunk = trunk_id,
            first_data = keep,
            "removing old log sections"
        );
        self.log_key = key;
        self.first_trunk_page = trunk_id;
        self.first_data_page = keep;
        store.set_log_first_page(key, trunk_id, keep)?;
        for trunk in &released {
            // Pages named by FREE_LOG stay out of the allocator while the log lives.
            self.undo_all.set(trunk.page_id() as usize);
            for &id in trunk.page_ids() {
                self.undo_all.set(id as usize);
            }
            let result = self.stream_mut()?.free_trunk(store, trunk);
            self.poison(result)?;
        }
        self.log_pending_undo(store)?;
        self.section_pages
            .retain(|&section, _| section >= first_uncommitted_section);
        self.first_section_id = first_uncommitted_section;
        Ok(())
    }

    /// Prepared transactions found by the last recovery.
    pub fn in_doubt_transactions(&self) -> &[InDoubtTransaction] {
        &self.in_doubt
    }

    /// Resolves a prepared transaction by overwriting its PREPARE_COMMIT
    /// record, on `page_id`, with a COMMIT or ROLLBACK record.
    pub fn set_in_doubt_state(
        &mut self,
        store: &mut dyn LogStore,
        session_id: SessionId,
        page_id: PageId,
        commit: bool,
    ) -> CoreResult<()> {
        if page_id >= store.page_count() {
            return Err(CoreError::invalid_operation(format!(
                "page {page_id} is outside the store"
            )));
        }
        let mut data = match Page::decode(page_id, &store.read_page(page_id)?)? {
            Page::Data(data) => data,
            other => {
                return Err(CoreError::invalid_operation(format!(
                    "page {page_id} is a {} page, not a log data page",
                    other.kind_name()
                )))
            }
        };
        let (record, state) = if commit {
            (LogRecord::Commit { session_id }, InDoubtState::Committed)
        } else {
            (LogRecord::Rollback { session_id }, InDoubtState::RolledBack)
        };
        data.init_write();
        data.write(&record.to_bytes());
        data.zero_remaining();
        store.write_page(page_id, &data.encode())?;
        for entry in self
            .in_doubt
            .iter_mut()
            .filter(|t| t.session_id() == session_id && t.page_id() == page_id)
        {
            entry.set_state(state);
        }
        debug!(%session_id, page_id, ?state, "in-doubt transaction resolved");
        store.flush()
    }

    /// Writes out the current data page and flushes the store.
    pub fn flush(&mut self, store: &mut dyn LogStore) -> CoreResult<()> {
        if self.stream.is_some() {
            if self.failed {
                return Err(CoreError::LogUnusable);
            }
            self.log_pending_undo(store)?;
            let result = self.stream_mut()?.flush(store);
            self.poison(result)?;
        }
        store.flush()
    }

    /// Drops the writer without writing anything more.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.last_key = self.last_key.max(stream.last_key());
            debug!(key = self.log_key, "log closed");
        }
    }

    /// Returns every page of the log to the store.
    pub fn free(&mut self, store: &mut dyn LogStore) -> CoreResult<()> {
        debug!(key = self.log_key, first_trunk = self.first_trunk_page, "freeing log");
        self.freeing = true;
        let result = self.free_pages(store);
        store.take_pending_undo();
        self.freeing = false;
        self.close();
        self.undo.clear_all();
        self.undo_all.clear_all();
        self.section_pages.clear();
        self.first_trunk_page = 0;
        self.first_data_page = 0;
        result
    }

    fn free_pages(&mut self, store: &mut dyn LogStore) -> CoreResult<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream.free_reserved(store)?;
        }
        let mut key = Some(self.log_key);
        let mut trunks = TrunkIterator::new(self.first_trunk_page);
        loop {
            match trunks.next(&*store)? {
                Some(trunk) if Some(trunk.log_key()) == key => {
                    self.last_key = self.last_key.max(trunk.log_key());
                    key = trunk.log_key().checked_add(1);
                    store.free_page(trunk.page_id())?;
                    for &id in trunk.page_ids() {
                        store.free_page(id)?;
                    }
                }
                _ => {
                    if trunks.can_delete() {
                        store.free_page(trunks.current_page_id())?;
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Bytes of pages the writer occupies.
    pub fn size(&self) -> u64 {
        self.stream.as_ref().map_or(0, LogPageStream::size)
    }

    /// Reads every record from the log's first data page, stopping where
    /// recovery would.
    pub fn records(&self, store: &dyn LogStore) -> CoreResult<RecordScan> {
        let mut reader =
            LogStreamReader::new(self.log_key, self.first_trunk_page, self.first_data_page);
        let mut records = Vec::new();
        let mut section = 0;
        let mut pos = 0;
        let end = loop {
            let record = match read_replayable(&mut reader, store) {
                Ok(Some((record, _))) => record,
                Ok(None) => break ScanEnd::EndOfStream,
                Err(e) if e.is_end_of_log() => break ScanEnd::Corrupted(e.to_string()),
                Err(e) => return Err(e),
            };
            pos += 1;
            match record {
                LogRecord::Noop => continue,
                LogRecord::Checkpoint => section += 1,
                _ => {}
            }
            records.push(ScannedRecord {
                pos: LogPosition::new(section, pos),
                data_page: reader.data_page(),
                record,
            });
        };
        Ok(RecordScan { records, end })
    }

    /// The section to pass to [`TransactionLog::remove_until`]: the
    /// oldest section any session still has uncommitted work in.
    pub fn first_uncommitted_section<'a, I>(&self, sessions: I) -> u32
    where
        I: IntoIterator<Item = &'a Session>,
    {
        sessions
            .into_iter()
            .filter_map(Session::first_uncommitted_log)
            .map(|pos| pos.section)
            .fold(self.log_section_id, u32::min)
    }

    /// The current section.
    pub fn log_section_id(&self) -> u32 {
        self.log_section_id
    }

    /// The oldest section still in the log.
    pub fn log_first_section_id(&self) -> u32 {
        self.first_section_id
    }

    /// Ordinal of the last row operation in the current section.
    pub fn log_pos(&self) -> u32 {
        self.log_pos
    }

    /// Key of the log's first trunk.
    pub fn log_key(&self) -> u32 {
        self.log_key
    }

    /// Page of the first live trunk.
    pub fn first_trunk_page(&self) -> PageId {
        self.first_trunk_page
    }

    /// First data page recovery reads.
    pub fn first_data_page(&self) -> PageId {
        self.first_data_page
    }

    /// Whether `page_id` was undo-logged in the current section.
    pub fn is_undo_logged(&self, page_id: PageId) -> bool {
        self.undo.get(page_id as usize)
    }

    /// Pages undo-logged while the log was open. The store's allocator
    /// must not hand these out.
    pub fn undo_all(&self) -> &BitField {
        &self.undo_all
    }

    /// Lowest page id the writer may allocate.
    pub fn min_page_id(&self) -> PageId {
        self.stream.as_ref().map_or(0, LogPageStream::min_page_id)
    }

    /// Counters of the last recovery.
    pub fn recovery_stats(&self) -> RecoveryStats {
        self.stats
    }

    /// Whether the writer is open.
    pub fn is_open_for_writing(&self) -> bool {
        self.stream.is_some()
    }

    /// Whether a failed write made the log unusable.
    pub fn is_failed(&self) -> bool {
        self.failed
    }
}

/// Reads the next record, expanding UNDO images. An image that cannot be
/// restored ends the log the same way a torn record does, in every pass.
fn read_replayable(
    reader: &mut LogStreamReader,
    store: &dyn LogStore,
) -> CoreResult<Option<(LogRecord, Option<Vec<u8>>)>> {
    let Some(record) = reader.next_record(store)? else {
        return Ok(None);
    };
    let page = match &record {
        LogRecord::Undo { image, .. } => Some(image.to_page(store)?),
        _ => None,
    };
    Ok(Some((record, page)))
}
