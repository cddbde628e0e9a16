//! # mutsync Outbox
//!
//! A durable, ordered outbox of mutations that have not reached the remote
//! yet.
//!
//! ## Components
//!
//! - [`OutgoingMutationQueue`]: `enqueue`, replay-then-live `observe`, `remove`
//! - [`OutboxStore`]: the durable store contract
//! - [`LogOutboxStore`]: append-only, CRC-framed log on a storage backend
//! - [`LogReplay`]: the rules that turn log frames into pending entries
//!
//! ## Guarantees
//!
//! - `enqueue` returns only after the record is durable
//! - a new `observe` stream replays every stored local-origin record in
//!   enqueue order before any live record, without gaps or duplicates
//! - records stay until removed, across restarts
//! - a crash mid-append loses at most the frame being written
//!
//! ## Example
//!
//! ```rust,no_run
//! use mutsync_codec::{ModelRegistry, MutationCodec};
//! use mutsync_outbox::OutgoingMutationQueue;
//! use std::path::Path;
//!
//! let codec = MutationCodec::new(ModelRegistry::new());
//! let queue = OutgoingMutationQueue::open_file(Path::new("outbox.log"), codec).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod frame;
mod log_store;
mod queue;
mod replay;
mod store;

pub use error::{OutboxError, OutboxResult};
pub use frame::{scan_log, Frame, FrameType, LogScan, FRAME_MAGIC, FRAME_VERSION};
pub use log_store::{LogOutboxStore, LogStats, LogStoreConfig};
pub use queue::{MutationStream, OutboxConfig, OutboxEvent, OutgoingMutationQueue};
pub use replay::LogReplay;
pub use store::{EntryKey, OutboxStore, QueueEntry};
