//! # mutsync Storage
//!
//! Byte-level storage backends underneath the durable outbox log.
//!
//! Backends are **opaque byte stores**: they know nothing about outbox frames,
//! mutation records, or CRCs. The outbox crate owns all interpretation.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral; clones share the same bytes, which lets
//!   tests drop a queue and reopen it to simulate a process restart
//! - [`FileBackend`] - persistent, guarded by an exclusive lock file
//!
//! ## Example
//!
//! ```rust
//! use mutsync_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
