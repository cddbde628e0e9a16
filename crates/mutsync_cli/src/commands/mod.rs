//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod inspect;
pub mod purge;
pub mod verify;

use mutsync_storage::FileBackend;
use std::path::Path;

pub(crate) type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Opens an existing log without modifying it.
pub(crate) fn open_log(path: &Path) -> CliResult<FileBackend> {
    if !path.exists() {
        return Err(format!("Outbox log not found at {}", path.display()).into());
    }
    Ok(FileBackend::open(path)?)
}
