//! Engine activity events.

use std::time::Duration;
use uuid::Uuid;

/// Something the engine did, broadcast to [`SyncEngine::events`](crate::SyncEngine::events)
/// subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The engine started.
    Started,
    /// The engine stopped.
    Stopped,
    /// A collaborator failed and the engine shut down.
    Failed {
        /// What failed.
        reason: String,
    },
    /// A local change was written to the outbox.
    Enqueued {
        /// Mutation ID.
        mutation_id: Uuid,
        /// Logical type name.
        model_type: String,
        /// Object identity.
        model_id: String,
    },
    /// A local change could not be written to the outbox.
    EnqueueFailed {
        /// Logical type name.
        model_type: String,
        /// Object identity.
        model_id: String,
        /// Error message.
        error: String,
    },
    /// An engine-originated change was not captured.
    EchoSkipped {
        /// Logical type name.
        model_type: String,
        /// Object identity.
        model_id: String,
    },
    /// An entry reached the remote and left the outbox.
    Published {
        /// Mutation ID.
        mutation_id: Uuid,
        /// Attempts it took.
        attempts: u32,
    },
    /// A publish attempt failed.
    PublishFailed {
        /// Mutation ID.
        mutation_id: Uuid,
        /// Error message.
        error: String,
        /// Whether the failure was retryable.
        retryable: bool,
    },
    /// A publish will be retried after a delay.
    Retrying {
        /// Mutation ID.
        mutation_id: Uuid,
        /// The attempt about to be made.
        attempt: u32,
        /// Backoff before it.
        delay: Duration,
    },
    /// An entry failed validation and stays in the outbox.
    RecordRejected {
        /// Mutation ID.
        mutation_id: Uuid,
        /// Error message.
        error: String,
    },
    /// An entry was moved to the dead-letter store.
    DeadLettered {
        /// Mutation ID.
        mutation_id: Uuid,
    },
}
