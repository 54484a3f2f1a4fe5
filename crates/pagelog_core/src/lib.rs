//! # pagelog core
//!
//! The write-ahead log of a page-oriented store, and the two primitives it is
//! built from.
//!
//! This crate provides:
//! - [`FreeSpaceBitmap`]: one page of allocation bits over a run of page ids
//! - [`LogPageStream`] / [`LogStreamReader`]: an append-only byte stream laid
//!   out over trunk pages and data pages, stamped with a log key
//! - [`TransactionLog`]: typed log records, checkpoints, section
//!   reclamation, three-stage crash recovery and the two-phase-commit
//!   in-doubt surface
//! - [`PageStore`]: a reference store implementing [`LogStore`] over any
//!   [`pagelog_storage::PageBackend`]
//!
//! ## Recovery
//!
//! ```text
//! open_for_reading(header) ─▶ Undo ─▶ Allocate ─▶ Redo ─▶ recover_end
//! ```
//!
//! The log is always read up to its first unreadable byte. A torn tail,
//! a stale page or a checksum failure ends the scan; it never fails
//! the open.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bitset;
mod config;
mod error;
mod log;
mod page;
mod store;
mod types;

pub use bitset::BitField;
pub use config::{LogConfig, StoreConfig, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
pub use error::{CoreError, CoreResult};
pub use log::{
    InDoubtState, InDoubtTransaction, LogPageStream, LogRecord, LogRecordType, LogStreamReader,
    RecordScan, RecoveryStage, RecoveryStats, ScanEnd, ScannedRecord, Session, TransactionLog,
    UndoImage,
};
pub use page::{
    compute_checksum, update_checksum, verify_checksum, FreeSpaceBitmap, LogStreamData,
    LogStreamTrunk, Page, PageKind, TrunkIterator,
};
pub use store::{
    probe_page_size, LogHeader, LogStore, MemoryTables, PageStore, RedoTarget, META_TABLE,
};
pub use types::{LogPosition, PageId, SessionId, TableId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
