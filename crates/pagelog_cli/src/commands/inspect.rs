//! Inspect command implementation.

use super::{open_store, walk_log};
use pagelog_core::{LogStore, PageId};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Page size in bytes.
    pub page_size: usize,
    /// Number of pages in the store.
    pub page_count: u32,
    /// Pages marked used in the free lists.
    pub used_pages: usize,
    /// Number of free list pages.
    pub free_list_pages: usize,
    /// Log header.
    pub log: LogInfo,
    /// Live log pages (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_pages: Option<Vec<PageId>>,
}

/// The log as described by the header and its trunk chain.
#[derive(Debug, Serialize)]
pub struct LogInfo {
    /// Key of the first trunk.
    pub key: u32,
    /// First trunk page.
    pub first_trunk: PageId,
    /// First data page.
    pub first_data: PageId,
    /// Trunks reachable from the first.
    pub trunks: usize,
    /// Trunk and data pages reachable from the first trunk.
    pub pages: usize,
    /// Key of the last reachable trunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_key: Option<u32>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_log_pages: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let header = store.log_header();
    let chain = walk_log(&store)?;

    let page_count = store.page_count();
    let used_pages = (0..page_count).filter(|&id| store.is_used(id)).count();

    let result = InspectResult {
        path: path.display().to_string(),
        page_size: store.page_size(),
        page_count,
        used_pages,
        free_list_pages: store.free_list_count(),
        log: LogInfo {
            key: header.log_key,
            first_trunk: header.first_trunk,
            first_data: header.first_data,
            trunks: chain.trunks.len(),
            pages: chain.pages.count_ones(),
            last_key: chain.last_key,
        },
        log_pages: show_log_pages.then(|| chain.pages.iter().map(|id| id as PageId).collect()),
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!("================");
    println!();
    println!("Page size:       {} bytes", result.page_size);
    println!("Pages:           {}", result.page_count);
    println!("Used pages:      {}", result.used_pages);
    println!("Free list pages: {}", result.free_list_pages);
    println!();
    println!("Log");
    println!("----");
    if result.log.first_trunk == 0 {
        println!("  (no log)");
        return;
    }
    println!("  Key:         {}", result.log.key);
    println!("  First trunk: {}", result.log.first_trunk);
    println!("  First data:  {}", result.log.first_data);
    println!("  Trunks:      {}", result.log.trunks);
    println!("  Pages:       {}", result.log.pages);
    if let Some(last) = result.log.last_key {
        println!("  Last key:    {}", last);
    }
    if let Some(pages) = &result.log_pages {
        println!();
        println!("Log pages:");
        for chunk in pages.chunks(12) {
            let line: Vec<String> = chunk.iter().map(ToString::to_string).collect();
            println!("  {}", line.join(" "));
        }
    }
}
