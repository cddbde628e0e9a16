//! Conversion between typed events and durable records.

use crate::error::{CodecError, CodecResult};
use crate::event::MutationEvent;
use crate::model::ModelRegistry;
use crate::record::MutationRecord;
use std::sync::Arc;

/// Maps [`MutationEvent`]s to [`MutationRecord`]s and back.
///
/// The codec holds nothing but an immutable registry and performs no I/O, so
/// one instance can be cloned freely across tasks.
///
/// # Example
///
/// ```rust
/// use mutsync_codec::{Model, ModelRegistry, MutationCodec, MutationEvent, MutationKind};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Person { id: String, name: String }
///
/// impl Model for Person {
///     const MODEL_TYPE: &'static str = "Person";
///     fn id(&self) -> String { self.id.clone() }
/// }
///
/// let codec = MutationCodec::new(ModelRegistry::new().with::<Person>());
/// let event = MutationEvent::local(
///     Person { id: "p1".into(), name: "Tony".into() },
///     MutationKind::Update,
/// );
///
/// let record = codec.encode(&event).unwrap();
/// assert_eq!(record.model_id, "p1");
/// assert_eq!(codec.decode(&record).unwrap(), event);
/// ```
#[derive(Debug, Clone)]
pub struct MutationCodec {
    registry: Arc<ModelRegistry>,
}

impl MutationCodec {
    /// Creates a codec over a registry.
    pub fn new(registry: ModelRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Returns the model registry.
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Encodes an event into a record.
    ///
    /// # Errors
    ///
    /// [`CodecError::UnknownModelType`] if the item's type is not registered
    /// (a record that could never be decoded is never produced), or
    /// [`CodecError::EncodingFailed`] if the fields do not serialize.
    pub fn encode(&self, event: &MutationEvent) -> CodecResult<MutationRecord> {
        let item = event.item();
        let model_type = item.model_type();
        if !self.registry.contains(model_type) {
            return Err(CodecError::unknown_model_type(model_type));
        }

        Ok(MutationRecord {
            mutation_id: event.mutation_id(),
            model_id: item.model_id(),
            model_type: model_type.to_owned(),
            kind: event.kind(),
            payload: item.encode_fields()?,
            origin: event.origin(),
        })
    }

    /// Decodes a record back into an event.
    ///
    /// # Errors
    ///
    /// [`CodecError::UnknownModelType`] for an unregistered type,
    /// [`CodecError::CorruptRecord`] if the payload does not parse or names a
    /// different identity than the record's `model_id`.
    pub fn decode(&self, record: &MutationRecord) -> CodecResult<MutationEvent> {
        let item = self.registry.decode(&record.model_type, &record.payload)?;

        let decoded_id = item.model_id();
        if decoded_id != record.model_id {
            return Err(CodecError::corrupt_record(format!(
                "payload identity {decoded_id:?} does not match model_id {:?}",
                record.model_id
            )));
        }

        Ok(MutationEvent::with_mutation_id(
            record.mutation_id,
            item,
            record.kind,
            record.origin,
        ))
    }
}
