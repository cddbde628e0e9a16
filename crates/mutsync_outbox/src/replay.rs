//! Rebuilding pending state from log frames.

use crate::frame::{Frame, LogScan};
use crate::store::EntryKey;
use mutsync_codec::MutationRecord;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// The pending records a log describes once its frames are applied in order.
///
/// [`crate::LogOutboxStore`] rebuilds its index with this on open and keeps it
/// current as it writes, so tools that read a log offline see exactly the
/// entries the store would serve.
///
/// Frames apply as follows:
///
/// - a put stores its record under its key, unless the mutation ID is already
///   pending; that put is ignored and the ID lands in `duplicate_ids`
/// - a remove drops the entry at its key when the mutation IDs match, and
///   otherwise lands in `orphan_removes`
/// - every frame advances the next key past its own
#[derive(Debug, Clone)]
pub struct LogReplay {
    live: BTreeMap<EntryKey, MutationRecord>,
    by_id: HashMap<Uuid, EntryKey>,
    next_key: EntryKey,
    /// Put frames applied.
    pub put_frames: usize,
    /// Remove frames applied.
    pub remove_frames: usize,
    /// Remove frames that matched no pending record, as `(offset, mutation_id)`.
    pub orphan_removes: Vec<(u64, Uuid)>,
    /// Mutation IDs put again while still pending.
    pub duplicate_ids: Vec<Uuid>,
}

impl Default for LogReplay {
    fn default() -> Self {
        Self {
            live: BTreeMap::new(),
            by_id: HashMap::new(),
            next_key: EntryKey::new(1),
            put_frames: 0,
            remove_frames: 0,
            orphan_removes: Vec::new(),
            duplicate_ids: Vec::new(),
        }
    }
}

impl LogReplay {
    /// Creates an empty replay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays every complete frame of a scanned log.
    #[must_use]
    pub fn from_scan(scan: &LogScan) -> Self {
        let mut replay = Self::new();
        for (offset, frame) in &scan.frames {
            replay.apply(*offset, frame.clone());
        }
        replay
    }

    /// Applies one frame found at `offset`.
    pub fn apply(&mut self, offset: u64, frame: Frame) {
        if frame.key() >= self.next_key {
            self.next_key = frame.key().next();
        }
        match frame {
            Frame::Put { key, record } => {
                self.put_frames += 1;
                if self.by_id.contains_key(&record.mutation_id) {
                    self.duplicate_ids.push(record.mutation_id);
                    return;
                }
                self.by_id.insert(record.mutation_id, key);
                if let Some(replaced) = self.live.insert(key, record) {
                    self.by_id.remove(&replaced.mutation_id);
                }
            }
            Frame::Remove { key, mutation_id } => {
                self.remove_frames += 1;
                let matches = self
                    .live
                    .get(&key)
                    .is_some_and(|record| record.mutation_id == mutation_id);
                if matches {
                    self.live.remove(&key);
                    self.by_id.remove(&mutation_id);
                } else {
                    self.orphan_removes.push((offset, mutation_id));
                }
            }
        }
    }

    /// Pending records by entry key.
    #[must_use]
    pub fn live(&self) -> &BTreeMap<EntryKey, MutationRecord> {
        &self.live
    }

    /// Returns the key a pending mutation is stored under.
    #[must_use]
    pub fn key_of(&self, mutation_id: Uuid) -> Option<EntryKey> {
        self.by_id.get(&mutation_id).copied()
    }

    /// The key the next put will use.
    #[must_use]
    pub fn next_key(&self) -> EntryKey {
        self.next_key
    }

    /// Number of pending records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Resets the frame counters after the log was rewritten with only the
    /// pending records.
    pub(crate) fn compacted(&mut self) {
        self.put_frames = self.live.len();
        self.remove_frames = 0;
        self.orphan_removes.clear();
        self.duplicate_ids.clear();
    }
}
