//! # mutsync Codec
//!
//! Converts typed mutation events into the uniform record the outbox stores
//! and the transport sends, and back again.
//!
//! - [`Model`] / [`AnyModel`]: typed domain objects and their erased view
//! - [`ModelRegistry`]: model type name to decoder
//! - [`MutationEvent`]: a typed mutation
//! - [`MutationRecord`]: the durable form, with a CBOR envelope
//! - [`MutationCodec`]: `encode` / `decode` between the two
//!
//! Payloads are the CBOR encoding (via `ciborium`) of the model's serde
//! representation. For any event `e` and record `r`:
//!
//! - `decode(encode(e)) == e`
//! - `encode(decode(r)) == r`
//!
//! Encoding is all-or-nothing: no partially filled record is ever returned.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod event;
mod kind;
mod model;
mod record;

pub use codec::MutationCodec;
pub use error::{CodecError, CodecResult};
pub use event::MutationEvent;
pub use kind::{MutationKind, Origin};
pub use model::{AnyModel, Model, ModelRef, ModelRegistry};
pub use record::MutationRecord;
