//! Dump log command implementation.

use super::open_store;
use pagelog_core::{LogConfig, LogRecord, PageId, ScanEnd, ScannedRecord, TransactionLog, UndoImage};
use serde::Serialize;
use std::path::Path;

/// Log record representation for output.
#[derive(Debug, Serialize)]
pub struct LogRecordInfo {
    /// Section, counted from the first section still in the log.
    pub section: u32,
    /// Record ordinal within the scan.
    pub pos: u32,
    /// Data page the record ends on.
    pub data_page: PageId,
    /// Record type.
    pub record_type: String,
    /// Session ID (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u32>,
    /// Table ID (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_id: Option<u32>,
    /// Row key (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<i64>,
    /// Column count of an added row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<usize>,
    /// Page an undo image belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_id: Option<PageId>,
    /// Undo image form and stored size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Global transaction name of a prepare.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    /// Pages released by a FREE_LOG record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_ids: Option<Vec<PageId>>,
}

impl From<&ScannedRecord> for LogRecordInfo {
    fn from(scanned: &ScannedRecord) -> Self {
        let record = &scanned.record;
        let mut info = LogRecordInfo {
            section: scanned.pos.section,
            pos: scanned.pos.pos,
            data_page: scanned.data_page,
            record_type: record.record_type().name().to_string(),
            session_id: record.session_id().map(|s| s.0),
            table_id: None,
            key: None,
            columns: None,
            page_id: None,
            image: None,
            transaction: None,
            page_ids: None,
        };
        match record {
            LogRecord::Undo { page_id, image } => {
                info.page_id = Some(*page_id);
                info.image = Some(match image {
                    UndoImage::Empty => "empty".to_string(),
                    UndoImage::Raw(_) => format!("raw/{}", image.stored_len()),
                    UndoImage::Compressed(_) => format!("lz4/{}", image.stored_len()),
                });
            }
            LogRecord::PrepareCommit { transaction, .. } => {
                info.transaction = Some(transaction.clone());
            }
            LogRecord::Add { table_id, row, .. } => {
                info.table_id = Some(table_id.0);
                info.key = Some(row.key());
                info.columns = Some(row.column_count());
            }
            LogRecord::Remove { table_id, key, .. } => {
                info.table_id = Some(table_id.0);
                info.key = Some(*key);
            }
            LogRecord::Truncate { table_id, .. } => {
                info.table_id = Some(table_id.0);
            }
            LogRecord::FreeLog { page_ids } => {
                info.page_ids = Some(page_ids.clone());
            }
            _ => {}
        }
        info
    }
}

/// Log dump output.
#[derive(Debug, Serialize)]
pub struct LogDump {
    /// Records in log order.
    pub records: Vec<LogRecordInfo>,
    /// Why the scan stopped, if not at a clean end of stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped: Option<String>,
}

/// Runs the dump-log command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    skip: usize,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let dump = read_log(path, limit, skip)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
        _ => {
            print_text_output(&dump);
        }
    }

    Ok(())
}

fn read_log(
    path: &Path,
    limit: Option<usize>,
    skip: usize,
) -> Result<LogDump, Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let header = store.log_header();
    if header.first_trunk == 0 {
        return Ok(LogDump {
            records: Vec::new(),
            stopped: None,
        });
    }

    let mut log = TransactionLog::new(LogConfig::new());
    log.open_for_reading(header.log_key, header.first_trunk, header.first_data)?;
    let scan = log.records(&store)?;

    let records = scan
        .records
        .iter()
        .skip(skip)
        .take(limit.unwrap_or(usize::MAX))
        .map(LogRecordInfo::from)
        .collect();
    let stopped = match scan.end {
        ScanEnd::EndOfStream => None,
        ScanEnd::Corrupted(reason) => Some(reason),
    };
    Ok(LogDump { records, stopped })
}

fn print_text_output(dump: &LogDump) {
    println!("Log Records ({} shown)", dump.records.len());
    println!("================");
    println!();

    for record in &dump.records {
        print!(
            "[{}:{:06}] page={:<6} {:14}",
            record.section, record.pos, record.data_page, record.record_type
        );

        if let Some(session) = record.session_id {
            print!(" session={}", session);
        }
        if let Some(table) = record.table_id {
            print!(" table={}", table);
        }
        if let Some(key) = record.key {
            print!(" key={}", key);
        }
        if let Some(columns) = record.columns {
            print!(" columns={}", columns);
        }
        if let Some(page) = record.page_id {
            print!(" undo_page={}", page);
        }
        if let Some(image) = &record.image {
            print!(" image={}", image);
        }
        if let Some(name) = &record.transaction {
            print!(" transaction={:?}", name);
        }
        if let Some(pages) = &record.page_ids {
            print!(" pages={:?}", pages);
        }
        println!();
    }

    if let Some(reason) = &dump.stopped {
        println!();
        println!("Scan stopped early: {}", reason);
    }
}
