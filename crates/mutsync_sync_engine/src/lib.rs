//! # mutsync Sync Engine
//!
//! Moves local mutations to a remote without losing them while offline.
//!
//! This crate provides:
//! - The [`SyncEngine`]: capture and publish pipelines over a durable outbox
//! - The [`LocalStorageAdapter`] and [`RemoteTransport`] seams
//! - Retry with exponential backoff and an optional dead-letter store
//! - An HTTP transport over a pluggable client
//!
//! ## Architecture
//!
//! ```text
//!  application writes
//!         │
//!         ▼
//!  LocalStorageAdapter ──changes──▶ capture ──enqueue──▶ outbox
//!         ▲                                                 │
//!         │ write-back (Origin::SyncEngine)          observe (replay, then live)
//!         │                                                 ▼
//!         └──────────── echo ◀──── RemoteTransport ◀──── publish
//! ```
//!
//! ## Key Invariants
//!
//! - Only `Origin::Local` changes are captured; engine write-backs never
//!   loop back to the remote
//! - An entry leaves the outbox only after the remote accepted it
//! - Entries for one object identity are published one at a time, in
//!   enqueue order
//! - Stored entries are published before live ones after a restart

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod config;
mod engine;
mod error;
mod events;
mod http;
mod state;
mod transport;

pub use adapter::{
    AdapterError, ChangeStream, InMemoryStorageAdapter, LocalStorageAdapter, StorageChange,
};
pub use config::{ExhaustedPolicy, RetryConfig, SyncConfig};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use events::SyncEvent;
pub use http::{HttpClient, HttpResponse, HttpTransport, CBOR_CONTENT_TYPE};
pub use state::{EngineState, SyncStats};
pub use transport::{MockTransport, PublishResponse, RemoteTransport};
