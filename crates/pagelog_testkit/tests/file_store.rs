//! The log over a real file.

use pagelog_codec::{Row, Value};
use pagelog_core::{
    probe_page_size, BitField, LogConfig, MemoryTables, PageStore, Session, SessionId, TableId,
    TransactionLog,
};
use pagelog_storage::FilePageBackend;

#[test]
fn committed_row_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.pglg");
    let table = TableId(2);
    let row = Row::new(1, vec![Value::from("persisted")]);
    {
        let backend = FilePageBackend::open(&path, 4096).unwrap();
        let mut store = PageStore::create(Box::new(backend), MemoryTables::new()).unwrap();
        let mut log = TransactionLog::new(LogConfig::new());
        let first = store.allocate_page(&BitField::new()).unwrap();
        log.open_for_writing(&mut store, first, false).unwrap();
        log.flush(&mut store).unwrap();
        store.sync().unwrap();

        let mut s = Session::new(SessionId(1));
        log.log_add_or_remove(&mut store, &mut s, table, &row, true)
            .unwrap();
        log.commit(&mut store, s.id()).unwrap();
        log.close();
    }

    assert_eq!(probe_page_size(&path).unwrap(), 4096);
    let backend = FilePageBackend::open(&path, 4096).unwrap();
    let mut store = PageStore::open(Box::new(backend), MemoryTables::new()).unwrap();
    let header = store.log_header();
    let mut log = TransactionLog::new(LogConfig::new());
    log.open_for_reading(header.log_key, header.first_trunk, header.first_data)
        .unwrap();
    let stats = log.recover_all(&mut store).unwrap();
    assert_eq!(stats.rows_redone, 1);
    assert_eq!(store.tables().get(table, 1), Some(&row));
}
