//! Append-only log implementation of [`OutboxStore`].

use crate::error::{OutboxError, OutboxResult};
use crate::frame::{scan_log, Frame};
use crate::replay::LogReplay;
use crate::store::{EntryKey, OutboxStore, QueueEntry};
use mutsync_codec::MutationRecord;
use mutsync_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageResult};
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for [`LogOutboxStore`].
#[derive(Debug, Clone)]
pub struct LogStoreConfig {
    /// Sync the backend after every write, not just flush it.
    pub sync_on_write: bool,
    /// Number of remove frames that must accumulate before compaction is
    /// considered. Compaction also requires removed frames to outnumber live
    /// entries.
    pub compaction_threshold: usize,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            compaction_threshold: 1024,
        }
    }
}

impl LogStoreConfig {
    /// Sets whether every write is synced.
    #[must_use]
    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Sets the compaction threshold.
    #[must_use]
    pub fn with_compaction_threshold(mut self, threshold: usize) -> Self {
        self.compaction_threshold = threshold;
        self
    }
}

/// Counters describing the state of an open log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogStats {
    /// Records currently stored.
    pub live_entries: usize,
    /// Remove frames written since the last compaction.
    pub removed_frames: usize,
    /// Size of the log in bytes.
    pub log_bytes: u64,
    /// Bytes discarded from a torn tail when the log was opened.
    pub recovered_torn_bytes: u64,
}

struct LogState {
    backend: Box<dyn StorageBackend>,
    index: LogReplay,
    recovered_torn_bytes: u64,
}

impl LogState {
    fn entry(key: &EntryKey, record: &MutationRecord) -> QueueEntry {
        QueueEntry {
            key: *key,
            record: record.clone(),
        }
    }

    /// Appends a frame, makes it durable and applies it to the index.
    /// A partial append is undone on error.
    fn write_frame(&mut self, frame: Frame, sync: bool) -> OutboxResult<()> {
        let bytes = frame.encode()?;
        let before = self.backend.size()?;

        if let Err(err) = append_durably(self.backend.as_mut(), &bytes, sync) {
            if let Ok(after) = self.backend.size() {
                if after > before {
                    if let Err(undo) = self.backend.truncate(before) {
                        warn!(error = %undo, "failed to discard partial outbox frame");
                    }
                }
            }
            return Err(err.into());
        }
        self.index.apply(before, frame);
        Ok(())
    }

    fn compact(&mut self) -> OutboxResult<()> {
        let mut bytes = Vec::new();
        for (key, record) in self.index.live() {
            let frame = Frame::Put {
                key: *key,
                record: record.clone(),
            };
            bytes.extend(frame.encode()?);
        }
        self.backend.rewrite(&bytes)?;

        info!(
            live_entries = self.index.len(),
            dropped_frames = self.index.remove_frames,
            log_bytes = bytes.len(),
            "compacted outbox log"
        );
        self.index.compacted();
        Ok(())
    }
}

fn append_durably(backend: &mut dyn StorageBackend, bytes: &[u8], sync: bool) -> StorageResult<()> {
    backend.append(bytes)?;
    backend.flush()?;
    if sync {
        backend.sync()?;
    }
    Ok(())
}

/// A durable outbox store backed by an append-only, CRC-framed log.
///
/// Every `put` and `delete` appends one frame. Opening the store scans the log
/// and rebuilds the in-memory index; a frame torn by a crash mid-append is
/// discarded. Remove frames accumulate until compaction rewrites the log with
/// only live records.
///
/// # Example
///
/// ```rust
/// use mutsync_outbox::{LogOutboxStore, OutboxStore};
///
/// let store = LogOutboxStore::in_memory().unwrap();
/// assert!(store.is_empty().unwrap());
/// ```
pub struct LogOutboxStore {
    state: Mutex<LogState>,
    config: LogStoreConfig,
}

impl LogOutboxStore {
    /// Opens a store over a backend with the default configuration.
    pub fn open(backend: Box<dyn StorageBackend>) -> OutboxResult<Self> {
        Self::open_with_config(backend, LogStoreConfig::default())
    }

    /// Opens a store over a backend.
    ///
    /// # Errors
    ///
    /// Fails if a complete frame is corrupt. A torn final frame is truncated
    /// away and is not an error.
    pub fn open_with_config(
        mut backend: Box<dyn StorageBackend>,
        config: LogStoreConfig,
    ) -> OutboxResult<Self> {
        let scan = scan_log(backend.as_ref())?;
        let torn = scan.torn_bytes();
        if torn > 0 {
            warn!(
                torn_bytes = torn,
                valid_len = scan.valid_len,
                "discarding torn frame at end of outbox log"
            );
            backend.truncate(scan.valid_len)?;
            backend.sync()?;
        }

        let mut index = LogReplay::new();
        for (offset, frame) in scan.frames {
            index.apply(offset, frame);
        }
        if !index.duplicate_ids.is_empty() {
            warn!(
                duplicates = index.duplicate_ids.len(),
                "ignoring repeated puts of pending mutations in outbox log"
            );
        }
        let state = LogState {
            backend,
            index,
            recovered_torn_bytes: torn,
        };

        debug!(
            live_entries = state.index.len(),
            removed_frames = state.index.remove_frames,
            next_key = state.index.next_key().as_u64(),
            "opened outbox log"
        );

        Ok(Self {
            state: Mutex::new(state),
            config,
        })
    }

    /// Opens a file-backed store, creating the file and its directories.
    pub fn open_file(path: &Path, config: LogStoreConfig) -> OutboxResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        Self::open_with_config(Box::new(backend), config)
    }

    /// Creates an empty store held in memory.
    pub fn in_memory() -> OutboxResult<Self> {
        Self::open(Box::new(InMemoryBackend::new()))
    }

    /// Returns the configuration.
    pub fn config(&self) -> &LogStoreConfig {
        &self.config
    }

    /// Rewrites the log with only live records, regardless of thresholds.
    pub fn compact(&self) -> OutboxResult<()> {
        self.state.lock().compact()
    }

    /// Returns counters describing the log.
    pub fn stats(&self) -> OutboxResult<LogStats> {
        let state = self.state.lock();
        Ok(LogStats {
            live_entries: state.index.len(),
            removed_frames: state.index.remove_frames,
            log_bytes: state.backend.size()?,
            recovered_torn_bytes: state.recovered_torn_bytes,
        })
    }

    fn should_compact(&self, state: &LogState) -> bool {
        state.index.remove_frames > self.config.compaction_threshold
            && state.index.remove_frames > state.index.len()
    }
}

impl OutboxStore for LogOutboxStore {
    fn put(&self, record: &MutationRecord) -> OutboxResult<QueueEntry> {
        let mut state = self.state.lock();
        if state.index.key_of(record.mutation_id).is_some() {
            return Err(OutboxError::DuplicateMutation(record.mutation_id));
        }

        let key = state.index.next_key();
        let frame = Frame::Put {
            key,
            record: record.clone(),
        };
        state.write_frame(frame, self.config.sync_on_write)?;

        Ok(QueueEntry {
            key,
            record: record.clone(),
        })
    }

    fn delete(&self, mutation_id: Uuid) -> OutboxResult<bool> {
        let mut state = self.state.lock();
        let Some(key) = state.index.key_of(mutation_id) else {
            return Ok(false);
        };

        let frame = Frame::Remove { key, mutation_id };
        state.write_frame(frame, self.config.sync_on_write)?;

        if self.should_compact(&state) {
            if let Err(err) = state.compact() {
                warn!(error = %err, "outbox compaction failed; log left uncompacted");
            }
        }
        Ok(true)
    }

    fn entries(&self) -> OutboxResult<Vec<QueueEntry>> {
        let state = self.state.lock();
        Ok(state
            .index
            .live()
            .iter()
            .map(|(key, record)| LogState::entry(key, record))
            .collect())
    }

    fn entries_after(&self, after: EntryKey) -> OutboxResult<Vec<QueueEntry>> {
        let state = self.state.lock();
        Ok(state
            .index
            .live()
            .range(after.next()..)
            .map(|(key, record)| LogState::entry(key, record))
            .collect())
    }

    fn len(&self) -> OutboxResult<usize> {
        Ok(self.state.lock().index.len())
    }

    fn contains(&self, mutation_id: Uuid) -> OutboxResult<bool> {
        Ok(self.state.lock().index.key_of(mutation_id).is_some())
    }
}

impl std::fmt::Debug for LogOutboxStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LogOutboxStore")
            .field("live_entries", &state.index.len())
            .field("next_key", &state.index.next_key())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mutsync_codec::{MutationKind, Origin};
    use tempfile::tempdir;

    fn record(model_id: &str) -> MutationRecord {
        MutationRecord {
            mutation_id: Uuid::new_v4(),
            model_id: model_id.into(),
            model_type: "Person".into(),
            kind: MutationKind::Update,
            payload: vec![0xa1, 0x61, 0x6e, 0x01],
            origin: Origin::Local,
        }
    }

    fn ids(store: &LogOutboxStore) -> Vec<String> {
        store
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| e.record.model_id)
            .collect()
    }

    #[test]
    fn put_assigns_increasing_keys() {
        let store = LogOutboxStore::in_memory().unwrap();
        let a = store.put(&record("p1")).unwrap();
        let b = store.put(&record("p2")).unwrap();

        assert_eq!(a.key, EntryKey::new(1));
        assert_eq!(b.key, EntryKey::new(2));
        assert_eq!(ids(&store), vec!["p1", "p2"]);
    }

    #[test]
    fn duplicate_mutation_id_rejected() {
        let store = LogOutboxStore::in_memory().unwrap();
        let rec = record("p1");
        store.put(&rec).unwrap();
        assert!(matches!(
            store.put(&rec),
            Err(OutboxError::DuplicateMutation(id)) if id == rec.mutation_id
        ));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let store = LogOutboxStore::in_memory().unwrap();
        let rec = record("p1");
        store.put(&rec).unwrap();

        assert!(store.delete(rec.mutation_id).unwrap());
        assert!(!store.delete(rec.mutation_id).unwrap());
        assert!(!store.delete(Uuid::new_v4()).unwrap());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn reopen_rebuilds_index() {
        let backend = InMemoryBackend::new();
        let (kept, removed) = (record("p1"), record("p2"));
        {
            let store = LogOutboxStore::open(Box::new(backend.clone())).unwrap();
            store.put(&kept).unwrap();
            store.put(&removed).unwrap();
            store.delete(removed.mutation_id).unwrap();
        }

        let store = LogOutboxStore::open(Box::new(backend)).unwrap();
        assert_eq!(ids(&store), vec!["p1"]);
        assert!(store.contains(kept.mutation_id).unwrap());
        assert!(!store.contains(removed.mutation_id).unwrap());
        assert_eq!(store.put(&record("p3")).unwrap().key, EntryKey::new(3));
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let backend = InMemoryBackend::new();
        {
            let store = LogOutboxStore::open(Box::new(backend.clone())).unwrap();
            store.put(&record("p1")).unwrap();
        }
        let intact = backend.data().len();
        let mut torn = backend.clone();
        torn.append(&[b'M', b'O', b'B', b'X', 1, 0, 1, 200, 0]).unwrap();

        let store = LogOutboxStore::open(Box::new(backend.clone())).unwrap();
        assert_eq!(ids(&store), vec!["p1"]);
        assert_eq!(backend.data().len(), intact);
        assert_eq!(store.stats().unwrap().recovered_torn_bytes, 9);
    }

    #[test]
    fn corrupt_frame_fails_open() {
        let backend = InMemoryBackend::new();
        {
            let store = LogOutboxStore::open(Box::new(backend.clone())).unwrap();
            store.put(&record("p1")).unwrap();
        }
        let mut bytes = backend.data();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x55;

        let result = LogOutboxStore::open(Box::new(InMemoryBackend::with_data(bytes)));
        assert!(matches!(result, Err(OutboxError::Persistence(_))));
    }

    #[test]
    fn compaction_drops_removed_frames() {
        let backend = InMemoryBackend::new();
        let config = LogStoreConfig::default().with_compaction_threshold(2);
        let store = LogOutboxStore::open_with_config(Box::new(backend.clone()), config).unwrap();

        let keep = record("keep");
        store.put(&keep).unwrap();
        for i in 0..3 {
            let rec = record(&format!("gone{i}"));
            store.put(&rec).unwrap();
            store.delete(rec.mutation_id).unwrap();
        }

        let stats = store.stats().unwrap();
        assert_eq!(stats.removed_frames, 0);
        assert_eq!(stats.live_entries, 1);

        let scan = scan_log(&backend).unwrap();
        assert_eq!(scan.frames.len(), 1);
        assert_eq!(scan.frames[0].1.key(), EntryKey::new(1));
    }

    #[test]
    fn empty_queue_compacts_to_nothing() {
        let backend = InMemoryBackend::new();
        let store = LogOutboxStore::open(Box::new(backend.clone())).unwrap();
        let rec = record("p1");
        store.put(&rec).unwrap();
        store.delete(rec.mutation_id).unwrap();

        store.compact().unwrap();
        assert!(backend.data().is_empty());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn keys_survive_compaction_and_reopen() {
        let backend = InMemoryBackend::new();
        {
            let store = LogOutboxStore::open(Box::new(backend.clone())).unwrap();
            let first = record("p1");
            store.put(&first).unwrap();
            store.put(&record("p2")).unwrap();
            store.delete(first.mutation_id).unwrap();
            store.compact().unwrap();
        }

        let store = LogOutboxStore::open(Box::new(backend)).unwrap();
        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, EntryKey::new(2));
        assert_eq!(store.entries_after(EntryKey::new(2)).unwrap(), vec![]);
    }

    #[test]
    fn file_store_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.log");
        let rec = record("p1");
        {
            let store = LogOutboxStore::open_file(&path, LogStoreConfig::default()).unwrap();
            store.put(&rec).unwrap();
        }

        let store = LogOutboxStore::open_file(&path, LogStoreConfig::default()).unwrap();
        assert_eq!(store.entries().unwrap()[0].record, rec);
    }

    /// Backend whose appends write half the bytes and then fail.
    #[derive(Default)]
    struct TearingBackend {
        inner: InMemoryBackend,
    }

    impl StorageBackend for TearingBackend {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }
        fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
            self.inner.append(&data[..data.len() / 2])?;
            Err(mutsync_storage::StorageError::Rejected("disk full".into()))
        }
        fn flush(&mut self) -> StorageResult<()> {
            self.inner.flush()
        }
        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }
        fn sync(&mut self) -> StorageResult<()> {
            self.inner.sync()
        }
        fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
            self.inner.truncate(new_size)
        }
        fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
            self.inner.rewrite(data)
        }
    }

    #[test]
    fn failed_append_leaves_no_trace() {
        let backend = TearingBackend::default();
        let shared = backend.inner.clone();
        let store = LogOutboxStore::open(Box::new(backend)).unwrap();

        let err = store.put(&record("p1")).unwrap_err();
        assert!(err.is_persistence());
        assert!(store.is_empty().unwrap());
        assert!(shared.data().is_empty());
    }
}
