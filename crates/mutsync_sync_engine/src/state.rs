//! Engine lifecycle state and statistics.

use std::fmt;
use std::time::Instant;

/// Lifecycle state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Not running. The initial state.
    Stopped,
    /// Both pipelines are running.
    Running,
    /// `stop` was called; in-flight work is settling.
    Stopping,
    /// A collaborator failed and both pipelines shut down.
    Failed,
}

impl EngineState {
    /// Returns true while the pipelines are running.
    pub fn is_running(&self) -> bool {
        matches!(self, EngineState::Running)
    }

    /// Returns true if `start` is allowed from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, EngineState::Stopped | EngineState::Failed)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Running => write!(f, "running"),
            EngineState::Stopping => write!(f, "stopping"),
            EngineState::Failed => write!(f, "failed"),
        }
    }
}

/// Counters describing engine activity since construction.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Local changes written to the outbox.
    pub captured: u64,
    /// Engine-originated changes dropped by the capture pipeline.
    pub echoes_skipped: u64,
    /// Local changes that could not be enqueued.
    pub enqueue_failures: u64,
    /// Entries published and removed from the outbox.
    pub published: u64,
    /// Failed publish attempts.
    pub publish_failures: u64,
    /// Retries scheduled after a retryable failure.
    pub retries: u64,
    /// Entries that failed validation and were left in the outbox.
    pub rejected: u64,
    /// Entries moved to the dead-letter store.
    pub dead_lettered: u64,
    /// Time of the last successful publish.
    pub last_publish_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_predicates() {
        assert!(EngineState::Stopped.can_start());
        assert!(EngineState::Failed.can_start());
        assert!(!EngineState::Running.can_start());
        assert!(!EngineState::Stopping.can_start());
        assert!(EngineState::Running.is_running());
        assert_eq!(EngineState::Stopping.to_string(), "stopping");
    }
}
