//! The transaction log: records, the page stream that carries them, and
//! recovery.

mod record;
mod session;
mod stream;
mod transaction_log;

pub use record::{LogRecord, LogRecordType, UndoImage};
pub use session::{InDoubtState, InDoubtTransaction, Session};
pub use stream::{LogPageStream, LogStreamReader};
pub use transaction_log::{
    RecordScan, RecoveryStage, RecoveryStats, ScanEnd, ScannedRecord, TransactionLog,
};
