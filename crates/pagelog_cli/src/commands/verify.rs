//! Verify command implementation.

use super::{open_store, walk_log};
use pagelog_core::{LogConfig, LogRecord, PageId, ScanEnd, TransactionLog};
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of log records read.
    pub records_checked: usize,
    /// Number of live log pages checked against the free lists.
    pub pages_checked: usize,
    /// Pages released by FREE_LOG records but still marked used.
    pub pending_release: usize,
    /// Notes that do not make the store invalid.
    pub warnings: Vec<String>,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {:?}", path);
    println!();

    let result = verify_store(path)?;
    print_result(&result);

    if !result.is_ok() {
        return Err("Verification failed".into());
    }
    Ok(())
}

fn verify_store(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let header = store.log_header();
    let mut result = VerifyResult::default();
    if header.first_trunk == 0 {
        result.warnings.push("store has no log".to_string());
        return Ok(result);
    }

    let chain = walk_log(&store)?;
    if chain.trunks.is_empty() {
        result.errors.push(format!(
            "first trunk {} does not carry log key {}",
            header.first_trunk, header.log_key
        ));
        return Ok(result);
    }
    if !chain.pages.get(header.first_data as usize) {
        result.errors.push(format!(
            "first data page {} is not part of the log",
            header.first_data
        ));
    }
    for id in chain.pages.iter() {
        result.pages_checked += 1;
        if !store.is_used(id as PageId) {
            result
                .errors
                .push(format!("log page {} is marked free", id));
        }
    }

    let mut log = TransactionLog::new(LogConfig::new());
    log.open_for_reading(header.log_key, header.first_trunk, header.first_data)?;
    let scan = log.records(&store)?;
    result.records_checked = scan.records.len();
    for scanned in &scan.records {
        if let LogRecord::FreeLog { page_ids } = &scanned.record {
            result.pending_release += page_ids
                .iter()
                .filter(|&&id| store.is_used(id) && !chain.pages.get(id as usize))
                .count();
        }
    }
    if let ScanEnd::Corrupted(reason) = scan.end {
        result
            .warnings
            .push(format!("log ends at an unreadable record: {}", reason));
    }

    Ok(result)
}

fn print_result(result: &VerifyResult) {
    println!("Log records:      {}", result.records_checked);
    println!("Log pages:        {}", result.pages_checked);
    if result.pending_release > 0 {
        println!(
            "Pending release:  {} (freed on next recovery)",
            result.pending_release
        );
    }
    for warning in &result.warnings {
        println!("  WARN: {}", warning);
    }
    for error in &result.errors {
        println!("  ERROR: {}", error);
    }
    println!();
    if result.is_ok() {
        println!("Store OK");
    } else {
        println!("Store has {} error(s)", result.errors.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::sample_store;
    use tempfile::TempDir;

    #[test]
    fn sample_store_verifies() {
        let dir = TempDir::new().unwrap();
        let path = sample_store(&dir);
        let result = verify_store(&path).unwrap();

        assert!(result.is_ok(), "{:?}", result.errors);
        assert!(result.records_checked >= 21);
        assert!(result.pages_checked > 0);
    }
}
