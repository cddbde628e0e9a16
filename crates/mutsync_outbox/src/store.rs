//! The durable store contract underneath the queue.

use crate::error::OutboxResult;
use mutsync_codec::MutationRecord;
use std::fmt;
use uuid::Uuid;

/// Durable storage key of a queue entry.
///
/// Keys are assigned at persistence time and increase monotonically for the
/// lifetime of an open store, so key order is enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey(u64);

impl EntryKey {
    /// Creates a key from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the key that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A persisted mutation record and its storage key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Storage key.
    pub key: EntryKey,
    /// The stored record.
    pub record: MutationRecord,
}

impl QueueEntry {
    /// Returns the mutation ID of the stored record.
    pub fn mutation_id(&self) -> Uuid {
        self.record.mutation_id
    }
}

/// A durable, ordered record store.
///
/// Implementations are blocking. The queue calls them from
/// `spawn_blocking` workers and is their only writer.
pub trait OutboxStore: Send + Sync {
    /// Durably stores a record and returns it with its assigned key.
    ///
    /// Returns only after the write is durable. On error nothing is stored.
    fn put(&self, record: &MutationRecord) -> OutboxResult<QueueEntry>;

    /// Deletes the record with the given mutation ID.
    ///
    /// Returns `false` if no such record exists; that is not an error.
    fn delete(&self, mutation_id: Uuid) -> OutboxResult<bool>;

    /// Returns all stored entries in key order.
    fn entries(&self) -> OutboxResult<Vec<QueueEntry>>;

    /// Returns the entries with keys strictly greater than `after`.
    fn entries_after(&self, after: EntryKey) -> OutboxResult<Vec<QueueEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|entry| entry.key > after)
            .collect())
    }

    /// Returns the number of stored entries.
    fn len(&self) -> OutboxResult<usize>;

    /// Returns true if nothing is stored.
    fn is_empty(&self) -> OutboxResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns true if a record with the given mutation ID is stored.
    fn contains(&self, mutation_id: Uuid) -> OutboxResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_order_and_advance() {
        let first = EntryKey::new(1);
        assert!(first < first.next());
        assert_eq!(first.next().as_u64(), 2);
        assert_eq!(first.to_string(), "#1");
    }
}
