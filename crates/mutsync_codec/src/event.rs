//! Typed mutation events.

use crate::kind::{MutationKind, Origin};
use crate::model::{Model, ModelRef};
use std::sync::Arc;
use uuid::Uuid;

/// A mutation of a typed domain object.
///
/// This is what the application and the storage adapter talk about. The
/// codec converts it into a [`MutationRecord`](crate::MutationRecord) for
/// persistence and transport.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    mutation_id: Uuid,
    item: ModelRef,
    kind: MutationKind,
    origin: Origin,
}

impl MutationEvent {
    /// Creates an event with a fresh mutation ID.
    pub fn new(item: ModelRef, kind: MutationKind, origin: Origin) -> Self {
        Self::with_mutation_id(Uuid::new_v4(), item, kind, origin)
    }

    /// Creates an event for a concrete model.
    pub fn from_model<M: Model>(model: M, kind: MutationKind, origin: Origin) -> Self {
        Self::new(Arc::new(model), kind, origin)
    }

    /// Creates an application-initiated event.
    pub fn local<M: Model>(model: M, kind: MutationKind) -> Self {
        Self::from_model(model, kind, Origin::Local)
    }

    /// Creates an event with a known mutation ID, as when decoding a record.
    pub fn with_mutation_id(
        mutation_id: Uuid,
        item: ModelRef,
        kind: MutationKind,
        origin: Origin,
    ) -> Self {
        Self {
            mutation_id,
            item,
            kind,
            origin,
        }
    }

    /// Returns the mutation ID.
    pub fn mutation_id(&self) -> Uuid {
        self.mutation_id
    }

    /// Returns the mutated object.
    pub fn item(&self) -> &ModelRef {
        &self.item
    }

    /// Returns the mutation kind.
    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    /// Returns the initiator tag.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Returns the object's logical type name.
    pub fn model_type(&self) -> &'static str {
        self.item.model_type()
    }

    /// Returns the object's identity.
    pub fn model_id(&self) -> String {
        self.item.model_id()
    }

    /// Downcasts the item to a concrete model type.
    pub fn model_as<M: Model>(&self) -> Option<&M> {
        self.item.downcast_ref::<M>()
    }
}

impl PartialEq for MutationEvent {
    fn eq(&self, other: &Self) -> bool {
        self.mutation_id == other.mutation_id
            && self.kind == other.kind
            && self.origin == other.origin
            && self.item.dyn_eq(other.item.as_ref())
    }
}
