//! Inspect command implementation.

use super::{open_log, CliResult};
use crate::Format;
use mutsync_outbox::{scan_log, LogReplay};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Outbox inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Log path.
    pub path: String,
    /// Log size in bytes.
    pub log_bytes: u64,
    /// Bytes after the last complete frame.
    pub torn_bytes: u64,
    /// Put frames in the log.
    pub put_frames: usize,
    /// Remove frames in the log.
    pub remove_frames: usize,
    /// Pending mutations.
    pub pending: usize,
    /// Pending mutations per model type.
    pub pending_by_type: BTreeMap<String, usize>,
    /// Key of the oldest pending mutation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_key: Option<u64>,
    /// Key of the newest pending mutation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_key: Option<u64>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> CliResult<()> {
    let result = inspect(path)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

pub(crate) fn inspect(path: &Path) -> CliResult<InspectResult> {
    let backend = open_log(path)?;
    let scan = scan_log(&backend)?;
    let state = LogReplay::from_scan(&scan);

    let mut pending_by_type = BTreeMap::new();
    for record in state.live().values() {
        *pending_by_type.entry(record.model_type.clone()).or_insert(0) += 1;
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        log_bytes: scan.total_len,
        torn_bytes: scan.torn_bytes(),
        put_frames: state.put_frames,
        remove_frames: state.remove_frames,
        pending: state.len(),
        pending_by_type,
        oldest_key: state.live().keys().next().map(|key| key.as_u64()),
        newest_key: state.live().keys().next_back().map(|key| key.as_u64()),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Outbox: {}", result.path);
    println!("================");
    println!("  Log size:      {} bytes", result.log_bytes);
    if result.torn_bytes > 0 {
        println!(
            "  Torn tail:     {} bytes (discarded on next open)",
            result.torn_bytes
        );
    }
    println!("  Put frames:    {}", result.put_frames);
    println!("  Remove frames: {}", result.remove_frames);
    println!("  Pending:       {}", result.pending);

    if let (Some(oldest), Some(newest)) = (result.oldest_key, result.newest_key) {
        println!("  Key range:     #{oldest} .. #{newest}");
    }

    if !result.pending_by_type.is_empty() {
        println!();
        println!("Pending by type:");
        for (model_type, count) in &result.pending_by_type {
            println!("  {model_type:<20} {count}");
        }
    }
}
