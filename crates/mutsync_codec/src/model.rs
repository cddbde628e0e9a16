//! Model reflection: the typed domain objects that mutations carry.
//!
//! A domain type opts in by implementing [`Model`]. The blanket [`AnyModel`]
//! impl gives the queue and the engine a type-erased handle, and a
//! [`ModelRegistry`] turns a stored `model_type` name back into a concrete
//! decoder.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A domain object that can be captured in the outbox.
///
/// Field encoding goes through serde, so prefer deterministic containers
/// (`BTreeMap` over `HashMap`) if byte-stable payloads matter.
///
/// # Example
///
/// ```rust
/// use mutsync_codec::Model;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Person {
///     id: String,
///     name: String,
/// }
///
/// impl Model for Person {
///     const MODEL_TYPE: &'static str = "Person";
///
///     fn id(&self) -> String {
///         self.id.clone()
///     }
/// }
/// ```
pub trait Model:
    Serialize + DeserializeOwned + Clone + fmt::Debug + PartialEq + Send + Sync + 'static
{
    /// Logical type name, stored in every record.
    const MODEL_TYPE: &'static str;

    /// Stable identity of this object.
    fn id(&self) -> String;
}

/// Shared, type-erased model handle.
pub type ModelRef = Arc<dyn AnyModel>;

/// Object-safe view of a [`Model`].
pub trait AnyModel: fmt::Debug + Send + Sync + 'static {
    /// Logical type name.
    fn model_type(&self) -> &'static str;

    /// Stable identity.
    fn model_id(&self) -> String;

    /// Encodes the object's fields as CBOR.
    fn encode_fields(&self) -> CodecResult<Vec<u8>>;

    /// Compares against another erased model.
    fn dyn_eq(&self, other: &dyn AnyModel) -> bool;

    /// Upcast for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;
}

impl<M: Model> AnyModel for M {
    fn model_type(&self) -> &'static str {
        M::MODEL_TYPE
    }

    fn model_id(&self) -> String {
        self.id()
    }

    fn encode_fields(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf).map_err(|e| {
            CodecError::encoding_failed(format!("{}: {e}", M::MODEL_TYPE))
        })?;
        Ok(buf)
    }

    fn dyn_eq(&self, other: &dyn AnyModel) -> bool {
        other
            .as_any()
            .downcast_ref::<M>()
            .is_some_and(|other| other == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn AnyModel {
    /// Downcasts to a concrete model type.
    pub fn downcast_ref<M: Model>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }
}

impl PartialEq for dyn AnyModel {
    fn eq(&self, other: &Self) -> bool {
        self.dyn_eq(other)
    }
}

type DecodeFn = fn(&[u8]) -> CodecResult<ModelRef>;

fn decode_fields<M: Model>(bytes: &[u8]) -> CodecResult<ModelRef> {
    let mut reader = bytes;
    let model: M = ciborium::de::from_reader(&mut reader).map_err(|e| {
        CodecError::corrupt_record(format!("{} payload: {e}", M::MODEL_TYPE))
    })?;
    if !reader.is_empty() {
        return Err(CodecError::corrupt_record(format!(
            "{} payload has {} trailing bytes",
            M::MODEL_TYPE,
            reader.len()
        )));
    }
    Ok(Arc::new(model))
}

/// Maps model type names to decoders.
///
/// The registry is built once at startup and then shared immutably.
#[derive(Default, Clone)]
pub struct ModelRegistry {
    decoders: BTreeMap<&'static str, DecodeFn>,
}

impl ModelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model type. Registering twice is harmless.
    pub fn register<M: Model>(&mut self) -> &mut Self {
        self.decoders.insert(M::MODEL_TYPE, decode_fields::<M>);
        self
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with<M: Model>(mut self) -> Self {
        self.register::<M>();
        self
    }

    /// Returns true if the type name is registered.
    pub fn contains(&self, model_type: &str) -> bool {
        self.decoders.contains_key(model_type)
    }

    /// Registered type names, sorted.
    pub fn model_types(&self) -> Vec<&'static str> {
        self.decoders.keys().copied().collect()
    }

    /// Decodes a payload as the named model type.
    ///
    /// # Errors
    ///
    /// [`CodecError::UnknownModelType`] if the name is not registered,
    /// [`CodecError::CorruptRecord`] if the payload does not parse.
    pub fn decode(&self, model_type: &str, payload: &[u8]) -> CodecResult<ModelRef> {
        let decode = self
            .decoders
            .get(model_type)
            .ok_or_else(|| CodecError::unknown_model_type(model_type))?;
        decode(payload)
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("model_types", &self.model_types())
            .finish()
    }
}
