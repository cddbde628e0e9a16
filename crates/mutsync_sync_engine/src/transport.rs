//! Remote transport abstraction.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use mutsync_codec::{MutationRecord, Origin};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// The remote's answer to a successful publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishResponse {
    /// The remote's view of the object after the mutation, to be written
    /// back into local storage.
    pub echo: Option<MutationRecord>,
}

impl PublishResponse {
    /// A response without an echo.
    pub fn accepted() -> Self {
        Self::default()
    }

    /// A response carrying an echo.
    pub fn with_echo(echo: MutationRecord) -> Self {
        Self { echo: Some(echo) }
    }
}

/// Sends mutation records to the remote.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, WebSocket, mock for testing, etc.).
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Publishes one record.
    ///
    /// Errors that may succeed on a later attempt should report
    /// `is_retryable() == true`.
    async fn publish(&self, record: &MutationRecord) -> SyncResult<PublishResponse>;
}

#[derive(Debug, Clone, Copy)]
struct FailurePlan {
    remaining: Option<u32>,
    retryable: bool,
}

#[derive(Debug, Default)]
struct MockState {
    published: Vec<MutationRecord>,
    attempts: u64,
    fail_next: VecDeque<bool>,
    fail_models: HashMap<String, FailurePlan>,
    in_flight: HashMap<(String, String), usize>,
    in_flight_total: usize,
    max_in_flight_per_identity: usize,
    max_in_flight_total: usize,
}

/// A mock transport for testing.
///
/// Succeeds by default. Failures can be scripted globally or per object
/// identity, and concurrency is tracked so tests can check per-identity
/// serialization.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    latency: Mutex<Duration>,
    echo: Mutex<bool>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the time every publish takes.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Makes successful publishes echo the record back.
    pub fn set_echo(&self, echo: bool) {
        *self.echo.lock() = echo;
    }

    /// Fails the next `count` publishes, whatever they carry.
    pub fn fail_next(&self, count: usize, retryable: bool) {
        let mut state = self.state.lock();
        state.fail_next.extend(std::iter::repeat(retryable).take(count));
    }

    /// Fails publishes for an object identity, `times` times or forever.
    pub fn fail_model(&self, model_id: impl Into<String>, times: Option<u32>, retryable: bool) {
        self.state.lock().fail_models.insert(
            model_id.into(),
            FailurePlan {
                remaining: times,
                retryable,
            },
        );
    }

    /// Stops failing publishes for an object identity.
    pub fn heal_model(&self, model_id: &str) {
        self.state.lock().fail_models.remove(model_id);
    }

    /// Records accepted so far, in completion order.
    pub fn published(&self) -> Vec<MutationRecord> {
        self.state.lock().published.clone()
    }

    /// Number of accepted records.
    pub fn publish_count(&self) -> usize {
        self.state.lock().published.len()
    }

    /// Number of publish calls, failed ones included.
    pub fn attempts(&self) -> u64 {
        self.state.lock().attempts
    }

    /// Highest number of concurrent calls seen for a single identity.
    pub fn max_in_flight_per_identity(&self) -> usize {
        self.state.lock().max_in_flight_per_identity
    }

    /// Highest number of concurrent calls seen overall.
    pub fn max_in_flight_total(&self) -> usize {
        self.state.lock().max_in_flight_total
    }

    fn begin(&self, identity: &(String, String)) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.attempts += 1;
        let count = {
            let count = state.in_flight.entry(identity.clone()).or_insert(0);
            *count += 1;
            *count
        };
        state.in_flight_total += 1;
        state.max_in_flight_per_identity = state.max_in_flight_per_identity.max(count);
        state.max_in_flight_total = state.max_in_flight_total.max(state.in_flight_total);
    }

    fn finish(&self, identity: &(String, String), record: &MutationRecord) -> SyncResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(count) = state.in_flight.get_mut(identity) {
            *count -= 1;
            if *count == 0 {
                state.in_flight.remove(identity);
            }
        }
        state.in_flight_total -= 1;

        if let Some(retryable) = state.fail_next.pop_front() {
            return Err(failure(retryable, "scripted failure"));
        }

        if let Some(plan) = state.fail_models.get_mut(&record.model_id) {
            let retryable = plan.retryable;
            match &mut plan.remaining {
                None => return Err(failure(retryable, "model is failing")),
                Some(0) => {}
                Some(n) => {
                    *n -= 1;
                    return Err(failure(retryable, "model is failing"));
                }
            }
        }

        state.published.push(record.clone());
        Ok(())
    }
}

fn failure(retryable: bool, message: &str) -> SyncError {
    if retryable {
        SyncError::transport_retryable(message)
    } else {
        SyncError::transport_fatal(message)
    }
}

#[async_trait]
impl RemoteTransport for MockTransport {
    async fn publish(&self, record: &MutationRecord) -> SyncResult<PublishResponse> {
        let identity = (record.model_type.clone(), record.model_id.clone());
        self.begin(&identity);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.finish(&identity, record)?;

        if *self.echo.lock() {
            Ok(PublishResponse::with_echo(MutationRecord {
                origin: Origin::SyncEngine,
                ..record.clone()
            }))
        } else {
            Ok(PublishResponse::accepted())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mutsync_codec::MutationKind;
    use uuid::Uuid;

    fn record(model_id: &str) -> MutationRecord {
        MutationRecord {
            mutation_id: Uuid::new_v4(),
            model_id: model_id.into(),
            model_type: "Person".into(),
            kind: MutationKind::Update,
            payload: vec![0xa0],
            origin: Origin::Local,
        }
    }

    #[tokio::test]
    async fn succeeds_by_default() {
        let transport = MockTransport::new();
        let response = transport.publish(&record("p1")).await.unwrap();
        assert_eq!(response, PublishResponse::accepted());
        assert_eq!(transport.publish_count(), 1);
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn scripted_failures() {
        let transport = MockTransport::new();
        transport.fail_next(1, true);
        transport.fail_model("p2", Some(2), false);

        let err = transport.publish(&record("p1")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(transport.publish(&record("p1")).await.is_ok());

        for _ in 0..2 {
            let err = transport.publish(&record("p2")).await.unwrap_err();
            assert!(!err.is_retryable());
        }
        assert!(transport.publish(&record("p2")).await.is_ok());

        assert_eq!(transport.attempts(), 5);
        assert_eq!(transport.publish_count(), 2);
    }

    #[tokio::test]
    async fn echo_is_tagged_as_engine_origin() {
        let transport = MockTransport::new();
        transport.set_echo(true);

        let sent = record("p1");
        let echo = transport.publish(&sent).await.unwrap().echo.unwrap();
        assert_eq!(echo.origin, Origin::SyncEngine);
        assert_eq!(echo.mutation_id, sent.mutation_id);
        assert_eq!(echo.payload, sent.payload);
    }
}
