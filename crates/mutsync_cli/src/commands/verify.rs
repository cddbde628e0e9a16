//! Verify command implementation.

use super::{open_log, CliResult};
use mutsync_outbox::{scan_log, LogReplay};
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of complete frames read.
    pub frames_checked: usize,
    /// Bytes after the last complete frame.
    pub torn_bytes: u64,
    /// Problems that make the log unusable.
    pub errors: Vec<String>,
    /// Oddities that recovery tolerates.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> CliResult<()> {
    println!("Verifying outbox at {}", path.display());
    println!();

    let result = verify(path)?;
    println!("  Frames checked: {}", result.frames_checked);
    for warning in &result.warnings {
        println!("  warning: {warning}");
    }
    for error in &result.errors {
        println!("  error: {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Outbox verification passed");
        Ok(())
    } else {
        println!("✗ Outbox verification failed");
        Err("Verification failed".into())
    }
}

pub(crate) fn verify(path: &Path) -> CliResult<VerifyResult> {
    let backend = open_log(path)?;
    let mut result = VerifyResult::default();

    let scan = match scan_log(&backend) {
        Ok(scan) => scan,
        Err(err) => {
            result.errors.push(err.to_string());
            return Ok(result);
        }
    };

    result.frames_checked = scan.frames.len();
    result.torn_bytes = scan.torn_bytes();
    if result.torn_bytes > 0 {
        result.warnings.push(format!(
            "{} torn bytes after offset {} will be discarded on next open",
            result.torn_bytes, scan.valid_len
        ));
    }

    let state = LogReplay::from_scan(&scan);
    for (offset, mutation_id) in &state.orphan_removes {
        result.warnings.push(format!(
            "remove frame at offset {offset} matches no pending mutation ({mutation_id})"
        ));
    }
    for mutation_id in &state.duplicate_ids {
        result
            .errors
            .push(format!("mutation {mutation_id} is put again while pending"));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mutsync_codec::{MutationKind, MutationRecord, Origin};
    use mutsync_outbox::{EntryKey, Frame, LogOutboxStore, LogStoreConfig, OutboxStore};
    use mutsync_storage::{FileBackend, StorageBackend};
    use uuid::Uuid;

    fn record(model_id: &str) -> MutationRecord {
        MutationRecord {
            mutation_id: Uuid::new_v4(),
            model_id: model_id.into(),
            model_type: "Person".into(),
            kind: MutationKind::Create,
            payload: vec![0xa0],
            origin: Origin::Local,
        }
    }

    #[test]
    fn healthy_log_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.log");
        {
            let store = LogOutboxStore::open_file(&path, LogStoreConfig::default()).unwrap();
            let first = record("p1");
            store.put(&first).unwrap();
            store.put(&record("p2")).unwrap();
            store.delete(first.mutation_id).unwrap();
        }

        let result = verify(&path).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.frames_checked, 3);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn torn_tail_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.log");
        {
            let store = LogOutboxStore::open_file(&path, LogStoreConfig::default()).unwrap();
            store.put(&record("p1")).unwrap();
        }
        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"MOBX\x01").unwrap();
            backend.sync().unwrap();
        }

        let result = verify(&path).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.torn_bytes, 5);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn flipped_byte_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.log");
        {
            let store = LogOutboxStore::open_file(&path, LogStoreConfig::default()).unwrap();
            store.put(&record("p1")).unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 6;
        bytes[last] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        let result = verify(&path).unwrap();
        assert!(!result.is_ok());
        assert!(result.errors[0].contains("CRC"));
    }

    #[test]
    fn repeated_put_is_an_error_and_the_store_keeps_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.log");
        let pending = record("p1");
        {
            let mut backend = FileBackend::open(&path).unwrap();
            for key in [1, 2] {
                let frame = Frame::Put {
                    key: EntryKey::new(key),
                    record: pending.clone(),
                };
                backend.append(&frame.encode().unwrap()).unwrap();
            }
            backend.sync().unwrap();
        }

        let result = verify(&path).unwrap();
        assert!(!result.is_ok());
        assert!(result.errors[0].contains(&pending.mutation_id.to_string()));

        let store = LogOutboxStore::open_file(&path, LogStoreConfig::default()).unwrap();
        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, EntryKey::new(1));
    }
}
