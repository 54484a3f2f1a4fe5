//! Log record types and serialization.
//!
//! ```text
//! NOOP (0)            (no payload)
//! UNDO (1)            page id, compressed length (0 = raw, 1 = empty page), image
//! COMMIT (2)          session id
//! PREPARE_COMMIT (3)  session id, transaction name
//! ROLLBACK (4)        session id
//! ADD (5)             session id, table id, row key (varlong), row length, row payload
//! REMOVE (6)          session id, table id, row key (varlong)
//! TRUNCATE (7)        session id, table id
//! CHECKPOINT (8)      (no payload)
//! FREE_LOG (9)        count, page id × count
//! ```
//!
//! All integers are varints unless noted. Records are self-delimiting and
//! may span data pages.

use std::fmt;

use pagelog_codec::{ByteSource, DataWriter, Row};

use crate::error::{CoreError, CoreResult};
use crate::store::LogStore;
use crate::types::{PageId, SessionId, TableId};

/// Compressed length marking a raw undo image.
const UNDO_RAW: u32 = 0;

/// Compressed length marking an empty page.
const UNDO_EMPTY: u32 = 1;

/// Type of log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// Padding; also what zeroed tail bytes decode as.
    Noop = 0,
    /// Before-image of a page.
    Undo = 1,
    /// Session commit.
    Commit = 2,
    /// Two-phase-commit prepare.
    PrepareCommit = 3,
    /// Session rollback.
    Rollback = 4,
    /// Row insert.
    Add = 5,
    /// Row delete.
    Remove = 6,
    /// Table truncate.
    Truncate = 7,
    /// Section boundary.
    Checkpoint = 8,
    /// Log pages released by section reclamation.
    FreeLog = 9,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Noop),
            1 => Some(Self::Undo),
            2 => Some(Self::Commit),
            3 => Some(Self::PrepareCommit),
            4 => Some(Self::Rollback),
            5 => Some(Self::Add),
            6 => Some(Self::Remove),
            7 => Some(Self::Truncate),
            8 => Some(Self::Checkpoint),
            9 => Some(Self::FreeLog),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Upper-case record name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Noop => "NOOP",
            Self::Undo => "UNDO",
            Self::Commit => "COMMIT",
            Self::PrepareCommit => "PREPARE_COMMIT",
            Self::Rollback => "ROLLBACK",
            Self::Add => "ADD",
            Self::Remove => "REMOVE",
            Self::Truncate => "TRUNCATE",
            Self::Checkpoint => "CHECKPOINT",
            Self::FreeLog => "FREE_LOG",
        }
    }
}

/// A page before-image as carried by an UNDO record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoImage {
    /// The page was empty (kind byte 0); restores to zeros.
    Empty,
    /// The full page, uncompressed.
    Raw(Vec<u8>),
    /// The page compressed with the store's compressor.
    Compressed(Vec<u8>),
}

impl UndoImage {
    /// Builds the image for a full page, compressing when it pays off.
    pub fn from_page(page: &[u8], store: &dyn LogStore, compress: bool) -> Self {
        if page.first() == Some(&0) {
            return UndoImage::Empty;
        }
        if compress {
            let compressed = store.compress(page);
            if compressed.len() > UNDO_EMPTY as usize && compressed.len() < page.len() {
                return UndoImage::Compressed(compressed);
            }
        }
        UndoImage::Raw(page.to_vec())
    }

    /// Restores the full page image.
    pub fn to_page(&self, store: &dyn LogStore) -> CoreResult<Vec<u8>> {
        let page_size = store.page_size();
        match self {
            UndoImage::Empty => Ok(vec![0; page_size]),
            UndoImage::Raw(page) if page.len() == page_size => Ok(page.clone()),
            UndoImage::Raw(page) => Err(CoreError::log_corruption(format!(
                "raw undo image of {} bytes, page size is {page_size}",
                page.len()
            ))),
            UndoImage::Compressed(data) => store.expand(data, page_size),
        }
    }

    /// Bytes the image occupies in the record.
    pub fn stored_len(&self) -> usize {
        match self {
            UndoImage::Empty => 0,
            UndoImage::Raw(data) | UndoImage::Compressed(data) => data.len(),
        }
    }
}

/// A log record.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    /// Padding.
    Noop,
    /// Before-image of a page.
    Undo {
        /// The page the image belongs to.
        page_id: PageId,
        /// The image.
        image: UndoImage,
    },
    /// Session commit.
    Commit {
        /// The committing session.
        session_id: SessionId,
    },
    /// Two-phase-commit prepare, written alone on its data page.
    PrepareCommit {
        /// The preparing session.
        session_id: SessionId,
        /// The global transaction name.
        transaction: String,
    },
    /// Session rollback.
    Rollback {
        /// The session rolling back.
        session_id: SessionId,
    },
    /// Row insert.
    Add {
        /// The issuing session.
        session_id: SessionId,
        /// The table.
        table_id: TableId,
        /// The inserted row.
        row: Row,
    },
    /// Row delete.
    Remove {
        /// The issuing session.
        session_id: SessionId,
        /// The table.
        table_id: TableId,
        /// Key of the deleted row.
        key: i64,
    },
    /// Table truncate.
    Truncate {
        /// The issuing session.
        session_id: SessionId,
        /// The table.
        table_id: TableId,
    },
    /// Section boundary.
    Checkpoint,
    /// Log pages released by section reclamation.
    FreeLog {
        /// The released trunk and data pages.
        page_ids: Vec<PageId>,
    },
}

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::Noop => LogRecordType::Noop,
            Self::Undo { .. } => LogRecordType::Undo,
            Self::Commit { .. } => LogRecordType::Commit,
            Self::PrepareCommit { .. } => LogRecordType::PrepareCommit,
            Self::Rollback { .. } => LogRecordType::Rollback,
            Self::Add { .. } => LogRecordType::Add,
            Self::Remove { .. } => LogRecordType::Remove,
            Self::Truncate { .. } => LogRecordType::Truncate,
            Self::Checkpoint => LogRecordType::Checkpoint,
            Self::FreeLog { .. } => LogRecordType::FreeLog,
        }
    }

    /// The session a record belongs to, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::Commit { session_id }
            | Self::PrepareCommit { session_id, .. }
            | Self::Rollback { session_id }
            | Self::Add { session_id, .. }
            | Self::Remove { session_id, .. }
            | Self::Truncate { session_id, .. } => Some(*session_id),
            _ => None,
        }
    }

    /// Appends the encoded record.
    pub fn encode(&self, w: &mut DataWriter) {
        w.write_u8(self.record_type().as_byte());
        match self {
            Self::Noop | Self::Checkpoint => {}
            Self::Undo { page_id, image } => {
                w.write_var_int(*page_id);
                match image {
                    UndoImage::Empty => w.write_var_int(UNDO_EMPTY),
                    UndoImage::Raw(page) => {
                        w.write_var_int(UNDO_RAW);
                        w.write_bytes(page);
                    }
                    UndoImage::Compressed(data) => {
                        w.write_var_int(data.len() as u32);
                        w.write_bytes(data);
                    }
                }
            }
            Self::Commit { session_id } | Self::Rollback { session_id } => {
                w.write_var_int(session_id.as_u32());
            }
            Self::PrepareCommit {
                session_id,
                transaction,
            } => {
                w.write_var_int(session_id.as_u32());
                w.write_string(transaction);
            }
            Self::Add {
                session_id,
                table_id,
                row,
            } => {
                w.write_var_int(session_id.as_u32());
                w.write_var_int(table_id.as_u32());
                w.write_var_i64(row.key());
                w.write_len_prefixed(&row.payload_bytes());
            }
            Self::Remove {
                session_id,
                table_id,
                key,
            } => {
                w.write_var_int(session_id.as_u32());
                w.write_var_int(table_id.as_u32());
                w.write_var_i64(*key);
            }
            Self::Truncate {
                session_id,
                table_id,
            } => {
                w.write_var_int(session_id.as_u32());
                w.write_var_int(table_id.as_u32());
            }
            Self::FreeLog { page_ids } => {
                w.write_var_int(page_ids.len() as u32);
                for &id in page_ids {
                    w.write_var_int(id);
                }
            }
        }
    }

    /// Encodes the record into a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = DataWriter::new();
        self.encode(&mut w);
        w.into_bytes()
    }

    /// Reads the next record, or `None` if the source is exhausted before
    /// its type byte.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogCorruption`] for an unknown type or an
    /// impossible length, and the source's error for truncated input.
    pub fn read_from<S>(src: &mut S, page_size: usize) -> CoreResult<Option<LogRecord>>
    where
        S: ByteSource + ?Sized,
        CoreError: From<S::Error>,
    {
        let Some(tag) = src.read_byte()? else {
            return Ok(None);
        };
        let record_type = LogRecordType::from_byte(tag)
            .ok_or_else(|| CoreError::log_corruption(format!("unknown record type {tag}")))?;
        let record = match record_type {
            LogRecordType::Noop => Self::Noop,
            LogRecordType::Checkpoint => Self::Checkpoint,
            LogRecordType::Undo => {
                let page_id = src.read_var_int()?;
                let image = match src.read_var_int()? {
                    UNDO_RAW => UndoImage::Raw(src.read_bytes(page_size)?),
                    UNDO_EMPTY => UndoImage::Empty,
                    len if len as usize >= page_size => {
                        return Err(CoreError::log_corruption(format!(
                            "undo image of page {page_id} claims {len} compressed bytes"
                        )))
                    }
                    len => UndoImage::Compressed(src.read_bytes(len as usize)?),
                };
                Self::Undo { page_id, image }
            }
            LogRecordType::Commit => Self::Commit {
                session_id: SessionId(src.read_var_int()?),
            },
            LogRecordType::Rollback => Self::Rollback {
                session_id: SessionId(src.read_var_int()?),
            },
            LogRecordType::PrepareCommit => Self::PrepareCommit {
                session_id: SessionId(src.read_var_int()?),
                transaction: src.read_string()?,
            },
            LogRecordType::Add => {
                let session_id = SessionId(src.read_var_int()?);
                let table_id = TableId(src.read_var_int()?);
                let key = src.read_var_i64()?;
                let payload = src.read_len_prefixed()?;
                Self::Add {
                    session_id,
                    table_id,
                    row: Row::decode_payload(key, &payload)?,
                }
            }
            LogRecordType::Remove => Self::Remove {
                session_id: SessionId(src.read_var_int()?),
                table_id: TableId(src.read_var_int()?),
                key: src.read_var_i64()?,
            },
            LogRecordType::Truncate => Self::Truncate {
                session_id: SessionId(src.read_var_int()?),
                table_id: TableId(src.read_var_int()?),
            },
            LogRecordType::FreeLog => {
                let count = src.read_var_int()? as usize;
                if count > page_size {
                    return Err(CoreError::log_corruption(format!(
                        "free-log record lists {count} pages"
                    )));
                }
                let mut page_ids = Vec::with_capacity(count);
                for _ in 0..count {
                    page_ids.push(src.read_var_int()?);
                }
                Self::FreeLog { page_ids }
            }
        };
        Ok(Some(record))
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.record_type().name();
        match self {
            Self::Noop | Self::Checkpoint => f.write_str(name),
            Self::Undo { page_id, image } => {
                let form = match image {
                    UndoImage::Empty => "empty",
                    UndoImage::Raw(_) => "raw",
                    UndoImage::Compressed(_) => "compressed",
                };
                write!(f, "{name} page={page_id} {form} {}B", image.stored_len())
            }
            Self::Commit { session_id } | Self::Rollback { session_id } => {
                write!(f, "{name} {session_id}")
            }
            Self::PrepareCommit {
                session_id,
                transaction,
            } => write!(f, "{name} {session_id} {transaction:?}"),
            Self::Add {
                session_id,
                table_id,
                row,
            } => write!(
                f,
                "{name} {session_id} {table_id} key={} columns={}",
                row.key(),
                row.column_count()
            ),
            Self::Remove {
                session_id,
                table_id,
                key,
            } => write!(f, "{name} {session_id} {table_id} key={key}"),
            Self::Truncate {
                session_id,
                table_id,
            } => write!(f, "{name} {session_id} {table_id}"),
            Self::FreeLog { page_ids } => write!(f, "{name} {page_ids:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::PageStore;
    use pagelog_codec::{CodecError, DataReader, Value};

    fn read_one(bytes: &[u8]) -> CoreResult<Option<LogRecord>> {
        LogRecord::read_from(&mut DataReader::new(bytes), 64)
    }

    #[test]
    fn type_bytes() {
        for b in 0..=9 {
            let t = LogRecordType::from_byte(b).unwrap();
            assert_eq!(t.as_byte(), b);
        }
        assert_eq!(LogRecordType::from_byte(10), None);
    }

    #[test]
    fn commit_wire_format() {
        let bytes = LogRecord::Commit {
            session_id: SessionId(300),
        }
        .to_bytes();
        assert_eq!(bytes, vec![2, 0xAC, 0x02]);
    }

    #[test]
    fn add_wire_format() {
        let row = Row::new(5, vec![Value::Int(1)]);
        let bytes = LogRecord::Add {
            session_id: SessionId(1),
            table_id: TableId(3),
            row,
        }
        .to_bytes();
        // type, session, table, key, payload length, column count, INT tag, 1
        assert_eq!(bytes, vec![5, 1, 3, 5, 3, 1, 3, 1]);
    }

    #[test]
    fn records_read_back() {
        let records = vec![
            LogRecord::Noop,
            LogRecord::Undo {
                page_id: 9,
                image: UndoImage::Empty,
            },
            LogRecord::PrepareCommit {
                session_id: SessionId(2),
                transaction: "tx1".into(),
            },
            LogRecord::Remove {
                session_id: SessionId(2),
                table_id: TableId(4),
                key: -7,
            },
            LogRecord::Truncate {
                session_id: SessionId(2),
                table_id: TableId(4),
            },
            LogRecord::Checkpoint,
            LogRecord::FreeLog {
                page_ids: vec![10, 11, 12],
            },
            LogRecord::Rollback {
                session_id: SessionId(8),
            },
        ];
        let mut w = DataWriter::new();
        for record in &records {
            record.encode(&mut w);
        }
        let bytes = w.into_bytes();
        let mut reader = DataReader::new(&bytes);
        for expected in &records {
            let record = LogRecord::read_from(&mut reader, 64).unwrap().unwrap();
            assert_eq!(&record, expected);
        }
        assert!(LogRecord::read_from(&mut reader, 64).unwrap().is_none());
    }

    #[test]
    fn zero_bytes_are_noops() {
        assert_eq!(read_one(&[0]).unwrap(), Some(LogRecord::Noop));
    }

    #[test]
    fn unknown_type_is_corruption() {
        assert!(matches!(
            read_one(&[42]),
            Err(CoreError::LogCorruption { .. })
        ));
    }

    #[test]
    fn truncated_record_is_codec_error() {
        assert!(matches!(
            read_one(&[5, 1]),
            Err(CoreError::Codec(CodecError::UnexpectedEof))
        ));
    }

    #[test]
    fn oversized_compressed_undo_is_corruption() {
        let bytes = [1, 9, 64];
        assert!(matches!(
            read_one(&bytes),
            Err(CoreError::LogCorruption { .. })
        ));
    }

    #[test]
    fn undo_images() {
        let store = PageStore::in_memory(&StoreConfig::new().page_size(64)).unwrap();
        let empty = [0u8; 64];
        assert_eq!(UndoImage::from_page(&empty, &store, true), UndoImage::Empty);

        let mut repetitive = [7u8; 64];
        repetitive[0] = 0x20;
        let image = UndoImage::from_page(&repetitive, &store, true);
        assert!(matches!(image, UndoImage::Compressed(ref c) if c.len() < 64));
        assert_eq!(image.to_page(&store).unwrap(), repetitive.to_vec());

        let raw = UndoImage::from_page(&repetitive, &store, false);
        assert!(matches!(raw, UndoImage::Raw(_)));
        assert_eq!(raw.to_page(&store).unwrap(), repetitive.to_vec());

        assert_eq!(
            UndoImage::Empty.to_page(&store).unwrap(),
            vec![0u8; 64]
        );
    }

    #[test]
    fn incompressible_page_is_raw() {
        let store = PageStore::in_memory(&StoreConfig::new().page_size(64)).unwrap();
        let page: Vec<u8> = (0..64u32).map(|i| (i * 97 + 13) as u8 | 1).collect();
        assert!(matches!(
            UndoImage::from_page(&page, &store, true),
            UndoImage::Raw(_)
        ));
    }

    #[test]
    fn display() {
        let record = LogRecord::Add {
            session_id: SessionId(1),
            table_id: TableId(3),
            row: Row::new(5, vec![Value::Int(1)]),
        };
        assert_eq!(record.to_string(), "ADD session:1 table:3 key=5 columns=1");
        assert_eq!(LogRecord::Checkpoint.to_string(), "CHECKPOINT");
    }
}
