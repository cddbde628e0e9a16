//! The uniform durable representation of a mutation.

use crate::error::{CodecError, CodecResult};
use crate::kind::{MutationKind, Origin};
use ciborium::value::Value;
use uuid::Uuid;

/// A mutation in its storable form.
///
/// Every typed [`MutationEvent`](crate::MutationEvent) maps onto exactly one
/// record. Records are what the outbox persists and what the transport sends.
///
/// # Fields
///
/// - `mutation_id`: names this particular mutation
/// - `model_id`: stable identity of the domain object
/// - `model_type`: logical type name, resolved through the model registry
/// - `kind`: create, update, or delete
/// - `payload`: CBOR encoding of the object's fields
/// - `origin`: who initiated the mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    /// Unique mutation ID.
    pub mutation_id: Uuid,
    /// Domain object identity.
    pub model_id: String,
    /// Logical type name.
    pub model_type: String,
    /// Mutation kind.
    pub kind: MutationKind,
    /// Encoded object fields.
    pub payload: Vec<u8>,
    /// Initiator tag.
    pub origin: Origin,
}

impl MutationRecord {
    /// Returns the `(model_type, model_id)` pair that orders publishes.
    pub fn identity(&self) -> (&str, &str) {
        (&self.model_type, &self.model_id)
    }

    /// Encodes the record envelope to CBOR bytes.
    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        let value = Value::Map(vec![
            (
                Value::Text("mutation_id".into()),
                Value::Bytes(self.mutation_id.as_bytes().to_vec()),
            ),
            (
                Value::Text("model_id".into()),
                Value::Text(self.model_id.clone()),
            ),
            (
                Value::Text("model_type".into()),
                Value::Text(self.model_type.clone()),
            ),
            (
                Value::Text("kind".into()),
                Value::Integer(self.kind.to_code().into()),
            ),
            (
                Value::Text("payload".into()),
                Value::Bytes(self.payload.clone()),
            ),
            (
                Value::Text("origin".into()),
                Value::Integer(self.origin.to_code().into()),
            ),
        ]);

        let mut buf = Vec::new();
        ciborium::ser::into_writer(&value, &mut buf)
            .map_err(|e| CodecError::encoding_failed(format!("record envelope: {e}")))?;
        Ok(buf)
    }

    /// Decodes a record envelope from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let value: Value = ciborium::de::from_reader(bytes)
            .map_err(|e| CodecError::corrupt_record(format!("record envelope: {e}")))?;
        let map = value
            .as_map()
            .ok_or_else(|| CodecError::corrupt_record("expected map for MutationRecord"))?;

        let get_field = |name: &str| {
            map.iter()
                .find(|(k, _)| k.as_text() == Some(name))
                .map(|(_, v)| v)
        };
        let get_code = |name: &str| -> CodecResult<u8> {
            let int = get_field(name)
                .and_then(|v: &Value| v.as_integer())
                .ok_or_else(|| CodecError::corrupt_record(format!("missing {name}")))?;
            u8::try_from(i128::from(int))
                .map_err(|_| CodecError::corrupt_record(format!("{name} out of range")))
        };
        let get_text = |name: &str| -> CodecResult<String> {
            get_field(name)
                .and_then(|v: &Value| v.as_text())
                .map(str::to_owned)
                .ok_or_else(|| CodecError::corrupt_record(format!("missing {name}")))
        };

        let id_bytes = get_field("mutation_id")
            .and_then(|v: &Value| v.as_bytes())
            .ok_or_else(|| CodecError::corrupt_record("missing mutation_id"))?;
        let mutation_id = Uuid::from_slice(id_bytes)
            .map_err(|_| CodecError::corrupt_record("mutation_id must be 16 bytes"))?;

        let kind = MutationKind::from_code(get_code("kind")?)
            .ok_or_else(|| CodecError::corrupt_record("invalid kind"))?;
        let origin = Origin::from_code(get_code("origin")?)
            .ok_or_else(|| CodecError::corrupt_record("invalid origin"))?;

        let payload = get_field("payload")
            .and_then(|v: &Value| v.as_bytes())
            .cloned()
            .ok_or_else(|| CodecError::corrupt_record("missing payload"))?;

        Ok(Self {
            mutation_id,
            model_id: get_text("model_id")?,
            model_type: get_text("model_type")?,
            kind,
            payload,
            origin,
        })
    }

    /// Returns the payload size in bytes.
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}
