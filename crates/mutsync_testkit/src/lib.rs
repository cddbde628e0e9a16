//! # mutsync Testkit
//!
//! Test utilities for mutsync.
//!
//! This crate provides:
//! - Sample models and outbox fixtures over memory or temp files
//! - Property-based test generators using proptest
//! - A crashable storage backend for recovery tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mutsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn survives_restart() {
//!     let outbox = TestOutbox::memory();
//!     outbox.queue.enqueue(&local_event(person("p1", "Ada"))).await.unwrap();
//!     let reopened = outbox.reopen();
//!     assert_eq!(reopened.queue.len().await.unwrap(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
