//! Test fixtures: a store and its log, driven through crashes.

use pagelog_codec::Row;
use pagelog_core::{
    BitField, LogConfig, LogPosition, LogStore, MemoryTables, PageId, PageStore, RecoveryStats,
    Session, TableId, TransactionLog, TrunkIterator,
};

use crate::crash::{CrashHandle, CrashablePageBackend};

/// Kind byte of the pages the harness writes on behalf of a user layer.
pub const USER_PAGE_KIND: u8 = 0x20;

/// A full user page: the kind byte, a zero checksum field, then `fill`.
pub fn user_page(page_size: usize, fill: u8) -> Vec<u8> {
    let mut page = vec![fill; page_size];
    page[0] = USER_PAGE_KIND;
    page[1] = 0;
    page[2] = 0;
    page
}

/// A [`PageStore`] over a [`CrashablePageBackend`] with an open
/// [`TransactionLog`].
///
/// The harness follows the write-ahead rule: before a user page is
/// written its before-image is undo-logged, and the log is flushed before
/// free lists are written back.
pub struct TestHarness {
    /// The store.
    pub store: PageStore,
    /// The log.
    pub log: TransactionLog,
    handle: CrashHandle,
    config: LogConfig,
}

impl TestHarness {
    /// Creates a store with a fresh log, both durable.
    pub fn new(page_size: usize) -> Self {
        Self::with_config(page_size, LogConfig::new())
    }

    /// Creates a store with a fresh log using `config`.
    pub fn with_config(page_size: usize, config: LogConfig) -> Self {
        let (backend, handle) = CrashablePageBackend::new(page_size);
        let store = PageStore::create(Box::new(backend), MemoryTables::new())
            .expect("Failed to create page store");
        let mut harness = Self {
            store,
            log: TransactionLog::new(config.clone()),
            handle,
            config,
        };
        harness.open_log();
        harness
    }

    fn open_log(&mut self) {
        let first = self
            .store
            .allocate_page(self.log.undo_all())
            .expect("Failed to allocate first trunk");
        self.log
            .open_for_writing(&mut self.store, first, false)
            .expect("Failed to open log for writing");
        self.sync();
    }

    /// The crash handle of the backend.
    pub fn handle(&self) -> &CrashHandle {
        &self.handle
    }

    /// Page size of the store.
    pub fn page_size(&self) -> usize {
        self.store.page_size()
    }

    /// Flushes the log, then writes back and syncs the store.
    pub fn sync(&mut self) {
        self.log.flush(&mut self.store).expect("Failed to flush log");
        self.store.sync().expect("Failed to sync store");
    }

    /// Simulates a crash: everything not flushed is lost. The store is
    /// reopened and a new log recovers it from the persisted header.
    pub fn crash(&mut self) -> RecoveryStats {
        let backend = self.handle.reopen();
        self.store = PageStore::open(Box::new(backend), MemoryTables::new())
            .expect("Failed to reopen page store");
        self.log = TransactionLog::new(self.config.clone());
        let header = self.store.log_header();
        self.log
            .open_for_reading(header.log_key, header.first_trunk, header.first_data)
            .expect("Failed to open log for reading");
        self.log
            .recover_all(&mut self.store)
            .expect("Recovery failed")
    }

    /// Replaces the recovered log by a fresh one, as a store does once
    /// recovery is complete.
    pub fn reopen_for_writing(&mut self) {
        self.log.recover_end();
        self.log.free(&mut self.store).expect("Failed to free old log");
        self.open_log();
    }

    /// Checkpoints, then drops every section `sessions` no longer need.
    pub fn checkpoint(&mut self, sessions: &[Session]) {
        self.sync();
        self.log
            .checkpoint(&mut self.store)
            .expect("Failed to checkpoint");
        let section = self.log.first_uncommitted_section(sessions);
        self.log
            .remove_until(&mut self.store, section)
            .expect("Failed to remove old sections");
        self.log.flush(&mut self.store).expect("Failed to flush log");
    }

    /// Allocates a page for user data, honouring the log's exclusions.
    pub fn allocate_user_page(&mut self) -> PageId {
        self.store
            .allocate_page(self.log.undo_all())
            .expect("Failed to allocate user page")
    }

    /// Undo-logs `page_id`, then overwrites it with a user page of `fill`.
    pub fn write_user_page(&mut self, page_id: PageId, fill: u8) {
        let before = self
            .store
            .read_page(page_id)
            .expect("Failed to read page before write");
        self.log
            .add_undo(&mut self.store, page_id, &before)
            .expect("Failed to log undo image");
        let page = user_page(self.page_size(), fill);
        self.store
            .write_page(page_id, &page)
            .expect("Failed to write user page");
    }

    /// The fill byte of a user page, `None` for a page that is blank or
    /// beyond the store.
    pub fn user_page_fill(&self, page_id: PageId) -> Option<u8> {
        if page_id >= self.store.page_count() {
            return None;
        }
        let page = self.store.read_page(page_id).expect("Failed to read page");
        (page[0] == USER_PAGE_KIND).then(|| page[3])
    }

    /// Whether a page reads as never written.
    pub fn user_page_is_blank(&self, page_id: PageId) -> bool {
        page_id >= self.store.page_count()
            || self
                .store
                .read_page(page_id)
                .expect("Failed to read page")
                .iter()
                .all(|&b| b == 0)
    }

    /// Logs a row insert or delete.
    pub fn log_row(
        &mut self,
        session: &mut Session,
        table: TableId,
        row: &Row,
        add: bool,
    ) -> LogPosition {
        self.log
            .log_add_or_remove(&mut self.store, session, table, row, add)
            .expect("Failed to log row")
    }

    /// Logs a commit and marks the session committed.
    pub fn commit(&mut self, session: &mut Session) {
        self.log
            .commit(&mut self.store, session.id())
            .expect("Failed to commit");
        session.set_all_committed();
    }

    /// The trunk and data pages reachable from the persisted log header.
    pub fn live_log_pages(&self) -> BitField {
        let header = self.store.log_header();
        let mut pages = BitField::new();
        let mut key = Some(header.log_key);
        let mut trunks = TrunkIterator::new(header.first_trunk);
        while let Some(trunk) = trunks.next(&self.store).expect("Failed to read trunk") {
            if Some(trunk.log_key()) != key {
                break;
            }
            key = trunk.log_key().checked_add(1);
            pages.set(trunk.page_id() as usize);
            for &id in trunk.page_ids() {
                pages.set(id as usize);
            }
        }
        pages
    }
}

impl std::fmt::Debug for TestHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHarness")
            .field("log_header", &self.store.log_header())
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}
