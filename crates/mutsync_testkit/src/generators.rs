//! Property-based test generators using proptest.

use crate::fixtures::{Person, Post};
use mutsync_codec::{MutationKind, MutationRecord, Origin};
use proptest::prelude::*;
use uuid::Uuid;

/// Strategy for object identities drawn from a small pool, so sequences
/// revisit the same identity.
pub fn model_id_strategy() -> impl Strategy<Value = String> {
    (0u8..8).prop_map(|n| format!("id-{n}"))
}

/// Strategy for [`Person`] values.
pub fn person_strategy() -> impl Strategy<Value = Person> {
    (
        model_id_strategy(),
        prop::string::string_regex("[A-Za-z ]{0,24}").expect("Invalid regex"),
        any::<u32>(),
    )
        .prop_map(|(id, name, age)| Person { id, name, age })
}

/// Strategy for [`Post`] values.
pub fn post_strategy() -> impl Strategy<Value = Post> {
    (
        model_id_strategy(),
        model_id_strategy(),
        prop::string::string_regex("[a-z ]{0,32}").expect("Invalid regex"),
        prop::collection::vec(
            prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
            0..4,
        ),
    )
        .prop_map(|(id, author_id, title, tags)| Post {
            id,
            author_id,
            title,
            tags,
        })
}

/// Strategy for mutation kinds.
pub fn mutation_kind_strategy() -> impl Strategy<Value = MutationKind> {
    prop::sample::select(MutationKind::ALL.to_vec())
}

/// Strategy for origins.
pub fn origin_strategy() -> impl Strategy<Value = Origin> {
    prop_oneof![Just(Origin::Local), Just(Origin::SyncEngine)]
}

/// Strategy for storage envelopes with opaque payloads.
///
/// Payloads are arbitrary bytes, so these records exercise the outbox, not
/// the model decoder.
pub fn record_strategy() -> impl Strategy<Value = MutationRecord> {
    (
        any::<u128>(),
        model_id_strategy(),
        prop::sample::select(vec!["Person", "Post"]),
        mutation_kind_strategy(),
        prop::collection::vec(any::<u8>(), 0..256),
        origin_strategy(),
    )
        .prop_map(
            |(id, model_id, model_type, kind, payload, origin)| MutationRecord {
                mutation_id: Uuid::from_u128(id),
                model_id,
                model_type: model_type.to_string(),
                kind,
                payload,
                origin,
            },
        )
}

/// One step against an outbox.
#[derive(Debug, Clone)]
pub enum OutboxOperation {
    /// Enqueue a local change to a person.
    Enqueue {
        /// The object.
        person: Person,
        /// What happened to it.
        kind: MutationKind,
    },
    /// Remove the pending entry at this position, modulo the pending count.
    Remove {
        /// Position among pending entries.
        index: usize,
    },
    /// Close and reopen the outbox.
    Restart,
}

/// Strategy for outbox operations.
pub fn outbox_operation_strategy() -> impl Strategy<Value = OutboxOperation> {
    prop_oneof![
        4 => (person_strategy(), mutation_kind_strategy())
            .prop_map(|(person, kind)| OutboxOperation::Enqueue { person, kind }),
        2 => any::<usize>().prop_map(|index| OutboxOperation::Remove { index }),
        1 => Just(OutboxOperation::Restart),
    ]
}

/// Strategy for a sequence of outbox operations.
pub fn outbox_operation_sequence(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<OutboxOperation>> {
    prop::collection::vec(outbox_operation_strategy(), min_ops..max_ops)
}
