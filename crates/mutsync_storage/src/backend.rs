//! Storage backend trait definition.

use crate::error::StorageResult;

/// A byte store that holds the outbox log.
///
/// Backends never interpret the bytes they hold. The outbox appends framed
/// records, reads them back on open, truncates a torn tail after a crash, and
/// occasionally rewrites the whole log during compaction.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - after `flush` returns, appended data survives process termination
/// - `rewrite` is all-or-nothing: readers see either the old or the new bytes
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range extends
    /// beyond the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage and returns its offset.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes appended data to the operating system.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes; the offset of the next `append`.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs data and metadata to durable media.
    ///
    /// Stronger than `flush`: file size and metadata are durable as well.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to `new_size` bytes.
    ///
    /// Used to discard a partially written final frame after a crash.
    ///
    /// # Errors
    ///
    /// Fails if `new_size` is greater than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the entire contents with `data`.
    ///
    /// Used by log compaction. A crash during `rewrite` leaves either the
    /// previous contents or the new contents, never a mix.
    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()>;
}
