//! Compact command implementation.

use super::CliResult;
use crate::commands::inspect::inspect;
use mutsync_outbox::{LogOutboxStore, LogStoreConfig};
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> CliResult<()> {
    println!("Compacting outbox at {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let before = inspect(path)?;
    println!("Compaction Analysis:");
    println!("  Pending mutations: {}", before.pending);
    println!("  Remove frames:     {}", before.remove_frames);
    println!(
        "  Superseded puts:   {}",
        before.put_frames.saturating_sub(before.pending)
    );
    println!("  Size before:       {} bytes", before.log_bytes);

    if dry_run {
        return Ok(());
    }
    if before.remove_frames == 0 && before.torn_bytes == 0 {
        println!();
        println!("No compaction needed - log holds only pending mutations");
        return Ok(());
    }

    let bytes_after = compact(path)?;
    println!("  Size after:        {bytes_after} bytes");
    println!(
        "  Space saved:       {} bytes",
        before.log_bytes.saturating_sub(bytes_after)
    );
    println!();
    println!("✓ Compaction complete");
    Ok(())
}

/// Compacts the log and returns its new size.
pub(crate) fn compact(path: &Path) -> CliResult<u64> {
    let store = LogOutboxStore::open_file(path, LogStoreConfig::default())?;
    store.compact()?;
    Ok(store.stats()?.log_bytes)
}
