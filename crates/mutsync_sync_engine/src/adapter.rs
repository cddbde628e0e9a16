//! Local storage adapter: where application writes happen.

use async_stream::stream;
use async_trait::async_trait;
use futures::Stream;
use mutsync_codec::{Model, ModelRef, MutationEvent, MutationKind, Origin};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};

/// Errors reported by a local storage adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The storage cannot be used at all.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The storage refused a single write.
    #[error("write rejected: {0}")]
    Rejected(String),

    /// The change feed dropped notifications.
    #[error("change feed lagged, {0} changes lost")]
    Lagged(u64),
}

/// A change notification from local storage.
#[derive(Debug, Clone)]
pub struct StorageChange {
    /// The object after the change (before it, for deletes).
    pub item: ModelRef,
    /// What happened.
    pub kind: MutationKind,
    /// Who made the change.
    pub origin: Origin,
}

impl StorageChange {
    /// Creates a change notification.
    pub fn new(item: ModelRef, kind: MutationKind, origin: Origin) -> Self {
        Self { item, kind, origin }
    }

    /// Converts the change into a mutation event with a fresh mutation ID.
    pub fn into_event(self) -> MutationEvent {
        MutationEvent::new(self.item, self.kind, self.origin)
    }
}

/// Stream of change notifications.
pub type ChangeStream = Pin<Box<dyn Stream<Item = Result<StorageChange, AdapterError>> + Send>>;

/// The local storage engine, as seen by the sync engine.
///
/// Every write carries an [`Origin`] and every change notification reports
/// it back, so the engine can tell its own write-backs from application
/// writes.
#[async_trait]
pub trait LocalStorageAdapter: Send + Sync {
    /// Subscribes to changes made after this call.
    ///
    /// An `Err` item or the end of the stream means storage is no longer
    /// usable.
    fn observe_changes(&self) -> ChangeStream;

    /// Inserts or replaces an object.
    async fn save(&self, item: ModelRef, origin: Origin) -> Result<(), AdapterError>;

    /// Deletes an object.
    async fn delete(&self, item: ModelRef, origin: Origin) -> Result<(), AdapterError>;

    /// Returns every stored object of a type.
    async fn query(&self, model_type: &str) -> Result<Vec<ModelRef>, AdapterError>;
}

type ChangeMessage = Result<StorageChange, AdapterError>;

/// A [`LocalStorageAdapter`] that keeps objects in memory.
///
/// Writes are fanned out to every change subscriber. `set_unavailable`
/// simulates storage going away: subscribers receive an error and further
/// calls fail.
pub struct InMemoryStorageAdapter {
    items: RwLock<BTreeMap<(String, String), ModelRef>>,
    changes: broadcast::Sender<ChangeMessage>,
    unavailable: RwLock<Option<String>>,
    writes: RwLock<Vec<(MutationKind, Origin, String)>>,
}

impl InMemoryStorageAdapter {
    /// Creates an empty adapter.
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Creates an empty adapter whose change feed buffers `capacity` changes
    /// per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            items: RwLock::new(BTreeMap::new()),
            changes,
            unavailable: RwLock::new(None),
            writes: RwLock::new(Vec::new()),
        }
    }

    /// Saves a concrete model as an application write.
    pub async fn write<M: Model>(&self, model: M) -> Result<(), AdapterError> {
        self.save(Arc::new(model), Origin::Local).await
    }

    /// Deletes a concrete model as an application write.
    pub async fn remove<M: Model>(&self, model: M) -> Result<(), AdapterError> {
        self.delete(Arc::new(model), Origin::Local).await
    }

    /// Returns the stored object, if any.
    pub fn get(&self, model_type: &str, model_id: &str) -> Option<ModelRef> {
        self.items
            .read()
            .get(&(model_type.to_owned(), model_id.to_owned()))
            .cloned()
    }

    /// Returns every write made so far as `(kind, origin, model_id)`.
    pub fn writes(&self) -> Vec<(MutationKind, Origin, String)> {
        self.writes.read().clone()
    }

    /// Makes storage unavailable (`Some`) or available again (`None`).
    ///
    /// Going unavailable pushes an error to every current subscriber.
    pub fn set_unavailable(&self, reason: Option<String>) {
        if let Some(reason) = &reason {
            let _ = self
                .changes
                .send(Err(AdapterError::Unavailable(reason.clone())));
        }
        *self.unavailable.write() = reason;
    }

    fn check_available(&self) -> Result<(), AdapterError> {
        match &*self.unavailable.read() {
            Some(reason) => Err(AdapterError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn record(&self, item: ModelRef, kind: MutationKind, origin: Origin) {
        self.writes.write().push((kind, origin, item.model_id()));
        let _ = self.changes.send(Ok(StorageChange::new(item, kind, origin)));
    }
}

impl Default for InMemoryStorageAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStorageAdapter for InMemoryStorageAdapter {
    fn observe_changes(&self) -> ChangeStream {
        // Subscribe now, not on first poll, so no write after this call is missed.
        let mut rx = self.changes.subscribe();
        let unavailable = self.unavailable.read().clone();

        Box::pin(stream! {
            if let Some(reason) = unavailable {
                yield Err(AdapterError::Unavailable(reason));
                return;
            }
            loop {
                match rx.recv().await {
                    Ok(change) => yield change,
                    Err(RecvError::Lagged(n)) => {
                        yield Err(AdapterError::Lagged(n));
                        return;
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        })
    }

    async fn save(&self, item: ModelRef, origin: Origin) -> Result<(), AdapterError> {
        self.check_available()?;
        let key = (item.model_type().to_owned(), item.model_id());
        let existed = self.items.write().insert(key, Arc::clone(&item)).is_some();
        let kind = if existed {
            MutationKind::Update
        } else {
            MutationKind::Create
        };
        self.record(item, kind, origin);
        Ok(())
    }

    async fn delete(&self, item: ModelRef, origin: Origin) -> Result<(), AdapterError> {
        self.check_available()?;
        let key = (item.model_type().to_owned(), item.model_id());
        self.items.write().remove(&key);
        self.record(item, MutationKind::Delete, origin);
        Ok(())
    }

    async fn query(&self, model_type: &str) -> Result<Vec<ModelRef>, AdapterError> {
        self.check_available()?;
        Ok(self
            .items
            .read()
            .iter()
            .filter(|((ty, _), _)| ty == model_type)
            .map(|(_, item)| Arc::clone(item))
            .collect())
    }
}
