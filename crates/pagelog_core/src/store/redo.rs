//! Targets for redo during recovery.

use std::collections::BTreeMap;

use pagelog_codec::Row;

use crate::error::CoreResult;
use crate::types::{PageId, TableId};

/// The table that describes every other table. Column 3 of its rows holds
/// the root page of the described index.
pub const META_TABLE: TableId = TableId(0);

/// Column of a meta-table row that holds the index root page id.
const META_ROOT_COLUMN: usize = 3;

/// The row layer that recovery replays committed operations into.
pub trait RedoTarget {
    /// Inserts (or replaces) a row.
    fn redo_add(&mut self, table: TableId, row: Row) -> CoreResult<()>;

    /// Deletes a row by key. Deleting a missing row is not an error.
    fn redo_remove(&mut self, table: TableId, key: i64) -> CoreResult<()>;

    /// Deletes every row of a table.
    fn redo_truncate(&mut self, table: TableId) -> CoreResult<()>;

    /// The index root page a row of `table` names, if any.
    fn index_root_page(&self, table: TableId, row: &Row) -> Option<PageId> {
        if table != META_TABLE {
            return None;
        }
        row.value(META_ROOT_COLUMN)
            .and_then(|v| v.as_i64())
            .and_then(|v| PageId::try_from(v).ok())
            .filter(|&page| page != 0)
    }
}

/// In-memory tables keyed by row key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTables {
    tables: BTreeMap<TableId, BTreeMap<i64, Row>>,
}

impl MemoryTables {
    /// Creates an empty set of tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a row.
    pub fn get(&self, table: TableId, key: i64) -> Option<&Row> {
        self.tables.get(&table)?.get(&key)
    }

    /// All rows of a table, by key.
    pub fn rows(&self, table: TableId) -> impl Iterator<Item = &Row> {
        self.tables.get(&table).into_iter().flat_map(|t| t.values())
    }

    /// Number of rows in a table.
    pub fn len(&self, table: TableId) -> usize {
        self.tables.get(&table).map_or(0, BTreeMap::len)
    }

    /// Returns true if no table holds a row.
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(BTreeMap::is_empty)
    }

    /// Tables that hold at least one row.
    pub fn table_ids(&self) -> impl Iterator<Item = TableId> + '_ {
        self.tables
            .iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(&id, _)| id)
    }
}

impl RedoTarget for MemoryTables {
    fn redo_add(&mut self, table: TableId, row: Row) -> CoreResult<()> {
        self.tables.entry(table).or_default().insert(row.key(), row);
        Ok(())
    }

    fn redo_remove(&mut self, table: TableId, key: i64) -> CoreResult<()> {
        if let Some(rows) = self.tables.get_mut(&table) {
            rows.remove(&key);
        }
        Ok(())
    }

    fn redo_truncate(&mut self, table: TableId) -> CoreResult<()> {
        self.tables.remove(&table);
        Ok(())
    }
}
