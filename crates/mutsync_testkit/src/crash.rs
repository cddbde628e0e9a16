//! Crash recovery testing for the outbox.
//!
//! [`CrashableBackend`] wraps an in-memory backend and can simulate a
//! process dying mid-append: part of a frame reaches the bytes and every
//! later write fails, so nothing gets cleaned up. Reopening an outbox over
//! the surviving bytes then exercises recovery.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mutsync_testkit::crash::CrashableOutbox;
//!
//! let outbox = CrashableOutbox::new();
//! outbox.switch.crash_after(5);
//! assert!(outbox.queue.enqueue(&event).await.is_err());
//! let recovered = outbox.recover();
//! ```

use crate::fixtures::{test_codec, TestOutbox};
use mutsync_outbox::{LogOutboxStore, OutgoingMutationQueue};
use mutsync_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct SwitchState {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_appends: AtomicBool,
    fail_sync: AtomicBool,
}

/// Remote control for a [`CrashableBackend`] owned by an outbox.
#[derive(Debug, Clone)]
pub struct CrashSwitch {
    state: Arc<SwitchState>,
}

impl CrashSwitch {
    fn new() -> Self {
        Self {
            state: Arc::new(SwitchState {
                crash_after_bytes: AtomicUsize::new(usize::MAX),
                bytes_written: AtomicUsize::new(0),
                crashed: AtomicBool::new(false),
                fail_appends: AtomicBool::new(false),
                fail_sync: AtomicBool::new(false),
            }),
        }
    }

    /// Crashes once `bytes` more bytes have been appended.
    pub fn crash_after(&self, bytes: usize) {
        self.state.bytes_written.store(0, Ordering::SeqCst);
        self.state.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Makes appends fail without writing anything. Not a crash.
    pub fn set_fail_appends(&self, fail: bool) {
        self.state.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Makes `sync` fail after the data was appended. Not a crash.
    pub fn set_fail_sync(&self, fail: bool) {
        self.state.fail_sync.store(fail, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Clears every fault and the crashed flag.
    pub fn reset(&self) {
        self.state.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.state.bytes_written.store(0, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
        self.state.fail_appends.store(false, Ordering::SeqCst);
        self.state.fail_sync.store(false, Ordering::SeqCst);
    }
}

fn simulated(message: &str) -> StorageError {
    StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, message.to_string()))
}

/// A storage backend wrapper that can simulate crashes and I/O faults.
#[derive(Debug)]
pub struct CrashableBackend {
    inner: InMemoryBackend,
    switch: CrashSwitch,
}

impl CrashableBackend {
    /// Wraps a backend and returns the switch that controls it.
    pub fn new(inner: InMemoryBackend) -> (Self, CrashSwitch) {
        let switch = CrashSwitch::new();
        (
            Self {
                inner,
                switch: switch.clone(),
            },
            switch,
        )
    }

    fn check_alive(&self) -> StorageResult<()> {
        if self.switch.has_crashed() {
            return Err(simulated("backend crashed"));
        }
        Ok(())
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        self.check_alive()?;
        let state = &self.switch.state;
        if state.fail_appends.load(Ordering::SeqCst) {
            return Err(simulated("simulated append failure"));
        }

        let current = state.bytes_written.fetch_add(bytes.len(), Ordering::SeqCst);
        let crash_threshold = state.crash_after_bytes.load(Ordering::SeqCst);

        if current.saturating_add(bytes.len()) > crash_threshold {
            state.crashed.store(true, Ordering::SeqCst);
            let partial_len = crash_threshold.saturating_sub(current);
            if partial_len > 0 {
                let _ = self.inner.append(&bytes[..partial_len]);
            }
            return Err(simulated("simulated crash during write"));
        }

        self.inner.append(bytes)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_alive()?;
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_alive()?;
        if self.switch.state.fail_sync.load(Ordering::SeqCst) {
            return Err(simulated("simulated sync failure"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_alive()?;
        self.inner.truncate(new_size)
    }

    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
        self.check_alive()?;
        self.inner.rewrite(data)
    }
}

/// An outbox over a [`CrashableBackend`].
pub struct CrashableOutbox {
    /// The queue under test.
    pub queue: OutgoingMutationQueue,
    /// Fault controls.
    pub switch: CrashSwitch,
    /// The raw bytes, as they would survive a crash.
    pub backend: InMemoryBackend,
}

impl CrashableOutbox {
    /// Creates an empty outbox with no faults armed.
    pub fn new() -> Self {
        let backend = InMemoryBackend::new();
        let (crashable, switch) = CrashableBackend::new(backend.clone());
        let store =
            LogOutboxStore::open(Box::new(crashable)).expect("Failed to open crashable outbox");
        Self {
            queue: OutgoingMutationQueue::new(Arc::new(store), test_codec()),
            switch,
            backend,
        }
    }

    /// Simulates a restart: drops the queue and reopens over the surviving
    /// bytes without any fault injection.
    pub fn recover(self) -> TestOutbox {
        let backend = self.backend.clone();
        drop(self);
        TestOutbox::over(backend)
    }
}

impl Default for CrashableOutbox {
    fn default() -> Self {
        Self::new()
    }
}
