//! Purge command implementation.

use super::CliResult;
use mutsync_outbox::{LogOutboxStore, LogStoreConfig, OutboxStore};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Runs the purge command.
pub fn run(path: &Path, mutation_id: Uuid) -> CliResult<()> {
    if !path.exists() {
        return Err(format!("Outbox log not found at {}", path.display()).into());
    }

    let store = LogOutboxStore::open_file(path, LogStoreConfig::default())?;
    if store.delete(mutation_id)? {
        info!(%mutation_id, path = %path.display(), "purged pending mutation");
        println!("✓ Purged {mutation_id}; it will not be published");
        Ok(())
    } else {
        Err(format!("Mutation {mutation_id} is not pending").into())
    }
}
