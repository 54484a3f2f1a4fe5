//! CLI command implementations.

pub mod dump_log;
pub mod inspect;
pub mod verify;

use pagelog_core::{probe_page_size, BitField, MemoryTables, PageId, PageStore, TrunkIterator};
use pagelog_storage::FilePageBackend;
use std::path::Path;

/// Opens a store file with the page size its header records.
pub fn open_store(path: &Path) -> Result<PageStore, Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(format!("No store found at {:?}", path).into());
    }
    let page_size = probe_page_size(path)?;
    let backend = FilePageBackend::open(path, page_size)?;
    Ok(PageStore::open(Box::new(backend), MemoryTables::new())?)
}

/// The trunk chain reachable from the log header.
#[derive(Debug, Default)]
pub struct LogChain {
    /// Trunk pages in chain order.
    pub trunks: Vec<PageId>,
    /// Trunk and data pages of the chain.
    pub pages: BitField,
    /// Key of the last trunk read.
    pub last_key: Option<u32>,
}

/// Walks the trunks of the current log, stopping at the first trunk whose
/// key does not follow its predecessor's.
pub fn walk_log(store: &PageStore) -> Result<LogChain, Box<dyn std::error::Error>> {
    let header = store.log_header();
    let mut chain = LogChain::default();
    if header.first_trunk == 0 {
        return Ok(chain);
    }
    let mut key = Some(header.log_key);
    let mut trunks = TrunkIterator::new(header.first_trunk);
    while let Some(trunk) = trunks.next(store)? {
        if Some(trunk.log_key()) != key {
            break;
        }
        chain.last_key = key;
        chain.trunks.push(trunk.page_id());
        chain.pages.set(trunk.page_id() as usize);
        for &id in trunk.page_ids() {
            chain.pages.set(id as usize);
        }
        key = trunk.log_key().checked_add(1);
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagelog_codec::{Row, Value};
    use pagelog_core::{LogConfig, Session, SessionId, TableId, TransactionLog};
    use tempfile::TempDir;

    pub(crate) fn sample_store(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("sample.pglog");
        let backend = FilePageBackend::open(&path, 256).unwrap();
        let mut store = PageStore::create(Box::new(backend), MemoryTables::new()).unwrap();
        let mut log = TransactionLog::new(LogConfig::new());
        let first = store.allocate_page(&BitField::new()).unwrap();
        log.open_for_writing(&mut store, first, false).unwrap();
        log.flush(&mut store).unwrap();
        store.sync().unwrap();
        let mut session = Session::new(SessionId(1));
        for key in 0..20 {
            let row = Row::new(key, vec![Value::String(format!("row {key}"))]);
            log.log_add_or_remove(&mut store, &mut session, TableId(3), &row, true)
                .unwrap();
        }
        log.commit(&mut store, session.id()).unwrap();
        log.flush(&mut store).unwrap();
        store.sync().unwrap();
        path
    }

    #[test]
    fn open_missing_store_fails() {
        let dir = TempDir::new().unwrap();
        assert!(open_store(&dir.path().join("missing.pglog")).is_err());
    }

    #[test]
    fn walk_log_marks_used_pages() {
        let dir = TempDir::new().unwrap();
        let path = sample_store(&dir);
        let store = open_store(&path).unwrap();
        let chain = walk_log(&store).unwrap();

        assert!(!chain.trunks.is_empty());
        assert_eq!(chain.trunks[0], store.log_header().first_trunk);
        assert!(chain.pages.iter().all(|id| store.is_used(id as PageId)));
    }
}
