//! The outgoing mutation queue.

use crate::error::{OutboxError, OutboxResult};
use crate::log_store::{LogOutboxStore, LogStoreConfig};
use crate::store::{EntryKey, OutboxStore, QueueEntry};
use async_stream::stream;
use futures::Stream;
use mutsync_codec::{CodecResult, MutationCodec, MutationEvent};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Stream of queue entries returned by [`OutgoingMutationQueue::observe`].
pub type MutationStream = Pin<Box<dyn Stream<Item = OutboxResult<QueueEntry>> + Send>>;

/// Configuration for [`OutgoingMutationQueue`].
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Capacity of the live notification channel. A subscriber that falls
    /// further behind re-reads the store instead of losing entries.
    pub live_channel_capacity: usize,
    /// Capacity of the [`OutboxEvent`] channel.
    pub event_channel_capacity: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            live_channel_capacity: 1024,
            event_channel_capacity: 256,
        }
    }
}

impl OutboxConfig {
    /// Sets the live channel capacity.
    #[must_use]
    pub fn with_live_channel_capacity(mut self, capacity: usize) -> Self {
        self.live_channel_capacity = capacity.max(1);
        self
    }

    /// Sets the event channel capacity.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }
}

/// Announcements about queue contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxEvent {
    /// A mutation was persisted.
    Enqueued {
        /// Storage key.
        key: EntryKey,
        /// Mutation ID.
        mutation_id: Uuid,
        /// Logical type name.
        model_type: String,
        /// Object identity.
        model_id: String,
    },
    /// A mutation was removed.
    Removed {
        /// Mutation ID.
        mutation_id: Uuid,
    },
    /// Number of entries still pending after a change.
    Status {
        /// Pending entry count.
        pending: usize,
    },
}

/// Durable, ordered staging area for outgoing mutations.
///
/// `enqueue` persists a mutation and then notifies live observers.
/// `observe` replays everything stored and then follows live notifications,
/// with no gap and no duplicate at the boundary. Entries stay until `remove`,
/// and survive restarts: a new queue over the same store replays them.
///
/// # Example
///
/// ```rust,no_run
/// use futures::StreamExt;
/// use mutsync_codec::{ModelRegistry, MutationCodec};
/// use mutsync_outbox::OutgoingMutationQueue;
///
/// # async fn demo() -> mutsync_outbox::OutboxResult<()> {
/// let codec = MutationCodec::new(ModelRegistry::new());
/// let queue = OutgoingMutationQueue::in_memory(codec)?;
///
/// let mut stream = queue.observe();
/// while let Some(entry) = stream.next().await {
///     let entry = entry?;
///     // publish, then:
///     queue.remove_entry(&entry).await?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct OutgoingMutationQueue {
    store: Arc<dyn OutboxStore>,
    codec: MutationCodec,
    live_tx: broadcast::Sender<QueueEntry>,
    events_tx: broadcast::Sender<OutboxEvent>,
    // Held from persistence until the live notification is sent, and by
    // `observe` while it subscribes and snapshots.
    write_lock: Arc<AsyncMutex<()>>,
}

impl OutgoingMutationQueue {
    /// Creates a queue over a store.
    pub fn new(store: Arc<dyn OutboxStore>, codec: MutationCodec) -> Self {
        Self::with_config(store, codec, OutboxConfig::default())
    }

    /// Creates a queue over a store with custom channel capacities.
    pub fn with_config(
        store: Arc<dyn OutboxStore>,
        codec: MutationCodec,
        config: OutboxConfig,
    ) -> Self {
        let (live_tx, _) = broadcast::channel(config.live_channel_capacity.max(1));
        let (events_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            store,
            codec,
            live_tx,
            events_tx,
            write_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Opens a queue over a file-backed log.
    pub fn open_file(path: &Path, codec: MutationCodec) -> OutboxResult<Self> {
        let store = LogOutboxStore::open_file(path, LogStoreConfig::default())?;
        Ok(Self::new(Arc::new(store), codec))
    }

    /// Creates a queue over an empty in-memory log.
    pub fn in_memory(codec: MutationCodec) -> OutboxResult<Self> {
        Ok(Self::new(Arc::new(LogOutboxStore::in_memory()?), codec))
    }

    /// Returns the codec.
    pub fn codec(&self) -> &MutationCodec {
        &self.codec
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn OutboxStore> {
        &self.store
    }

    /// Encodes and durably stores a mutation, then notifies live observers.
    ///
    /// Returns once the write is durable. If the caller is cancelled after
    /// persistence starts, the write and the notification still complete.
    ///
    /// # Errors
    ///
    /// - [`OutboxError::Codec`] if the event cannot be encoded; nothing is stored
    /// - [`OutboxError::Persistence`] if the store rejects the write; no
    ///   notification is sent and the write is not retried
    /// - [`OutboxError::DuplicateMutation`] if a record with the same mutation
    ///   ID is still pending; the stored record is left untouched
    pub async fn enqueue(&self, event: &MutationEvent) -> OutboxResult<QueueEntry> {
        let record = self.codec.encode(event)?;

        let guard = Arc::clone(&self.write_lock).lock_owned().await;
        let store = Arc::clone(&self.store);
        let live_tx = self.live_tx.clone();
        let (entry, pending) = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let entry = store.put(&record)?;
            // No receivers is fine: the entry will be replayed.
            let _ = live_tx.send(entry.clone());
            let pending = store.len().ok();
            Ok::<_, OutboxError>((entry, pending))
        })
        .await??;

        debug!(
            key = entry.key.as_u64(),
            mutation_id = %entry.record.mutation_id,
            model_type = %entry.record.model_type,
            model_id = %entry.record.model_id,
            kind = %entry.record.kind,
            "enqueued mutation"
        );
        self.announce(OutboxEvent::Enqueued {
            key: entry.key,
            mutation_id: entry.record.mutation_id,
            model_type: entry.record.model_type.clone(),
            model_id: entry.record.model_id.clone(),
        });
        self.announce_status(pending);

        Ok(entry)
    }

    /// Subscribes to stored and future entries.
    ///
    /// The stream first yields every stored entry with a local origin in
    /// persistence order, then every entry enqueued afterwards. Each call
    /// starts an independent replay. If the subscriber lags behind the live
    /// channel, the missed entries are re-read from the store.
    ///
    /// The subscription is taken on first poll. The stream ends when the
    /// queue is dropped, and yields an error if a store read fails.
    pub fn observe(&self) -> MutationStream {
        let store = Arc::clone(&self.store);
        let write_lock = Arc::clone(&self.write_lock);
        let live_tx = self.live_tx.clone();

        Box::pin(stream! {
            let (mut live_rx, snapshot) = {
                let _guard = write_lock.lock().await;
                let live_rx = live_tx.subscribe();
                drop(live_tx);
                (live_rx, read_entries(&store, None).await)
            };

            let mut last: Option<EntryKey> = None;
            let snapshot = match snapshot {
                Ok(entries) => entries,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };
            for entry in snapshot {
                last = Some(entry.key);
                if entry.record.origin.is_local() {
                    yield Ok(entry);
                }
            }

            loop {
                match live_rx.recv().await {
                    Ok(entry) => {
                        if last.is_some_and(|seen| entry.key <= seen) {
                            continue;
                        }
                        last = Some(entry.key);
                        if entry.record.origin.is_local() {
                            yield Ok(entry);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "outbox observer lagged; re-reading store");
                        match read_entries(&store, last).await {
                            Ok(entries) => {
                                for entry in entries {
                                    last = Some(entry.key);
                                    if entry.record.origin.is_local() {
                                        yield Ok(entry);
                                    }
                                }
                            }
                            Err(err) => {
                                yield Err(err);
                                return;
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Removes the stored record for an event.
    ///
    /// Removing an unknown or already removed mutation succeeds.
    pub async fn remove(&self, event: &MutationEvent) -> OutboxResult<()> {
        self.remove_by_id(event.mutation_id()).await.map(|_| ())
    }

    /// Removes the stored record for an entry.
    pub async fn remove_entry(&self, entry: &QueueEntry) -> OutboxResult<()> {
        self.remove_by_id(entry.record.mutation_id).await.map(|_| ())
    }

    /// Removes a record by mutation ID. Returns whether it was stored.
    pub async fn remove_by_id(&self, mutation_id: Uuid) -> OutboxResult<bool> {
        let store = Arc::clone(&self.store);
        let (removed, pending) = tokio::task::spawn_blocking(move || {
            let removed = store.delete(mutation_id)?;
            Ok::<_, OutboxError>((removed, store.len().ok()))
        })
        .await??;

        if removed {
            debug!(mutation_id = %mutation_id, ?pending, "removed mutation");
            self.announce(OutboxEvent::Removed { mutation_id });
            self.announce_status(pending);
        }
        Ok(removed)
    }

    /// Returns true if any stored entry targets the given object identity.
    pub async fn has_pending(&self, model_id: &str) -> OutboxResult<bool> {
        let entries = self.pending().await?;
        Ok(entries.iter().any(|entry| entry.record.model_id == model_id))
    }

    /// Returns every stored entry in persistence order.
    pub async fn pending(&self) -> OutboxResult<Vec<QueueEntry>> {
        read_entries(&self.store, None).await
    }

    /// Returns the number of stored entries.
    pub async fn len(&self) -> OutboxResult<usize> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.len()).await?
    }

    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> OutboxResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Decodes an entry back into a typed event.
    pub fn decode(&self, entry: &QueueEntry) -> CodecResult<MutationEvent> {
        self.codec.decode(&entry.record)
    }

    /// Subscribes to queue announcements.
    pub fn events(&self) -> broadcast::Receiver<OutboxEvent> {
        self.events_tx.subscribe()
    }

    fn announce(&self, event: OutboxEvent) {
        let _ = self.events_tx.send(event);
    }

    fn announce_status(&self, pending: Option<usize>) {
        if let Some(pending) = pending {
            self.announce(OutboxEvent::Status { pending });
        }
    }
}

impl std::fmt::Debug for OutgoingMutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingMutationQueue")
            .field("codec", &self.codec)
            .field("live_subscribers", &self.live_tx.receiver_count())
            .finish()
    }
}

async fn read_entries(
    store: &Arc<dyn OutboxStore>,
    after: Option<EntryKey>,
) -> OutboxResult<Vec<QueueEntry>> {
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || match after {
        Some(key) => store.entries_after(key),
        None => store.entries(),
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use mutsync_codec::{Model, ModelRegistry, MutationKind, Origin};
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person {
        id: String,
        name: String,
    }

    impl Model for Person {
        const MODEL_TYPE: &'static str = "Person";

        fn id(&self) -> String {
            self.id.clone()
        }
    }

    fn person(id: &str) -> Person {
        Person {
            id: id.into(),
            name: "Tony".into(),
        }
    }

    fn queue() -> OutgoingMutationQueue {
        OutgoingMutationQueue::in_memory(MutationCodec::new(ModelRegistry::new().with::<Person>()))
            .unwrap()
    }

    #[test]
    fn config_defaults() {
        let config = OutboxConfig::default();
        assert_eq!(config.live_channel_capacity, 1024);
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(
            OutboxConfig::default()
                .with_live_channel_capacity(0)
                .live_channel_capacity,
            1
        );
    }

    #[tokio::test]
    async fn enqueue_announces() {
        let queue = queue();
        let mut events = queue.events();

        let entry = queue
            .enqueue(&MutationEvent::local(person("p1"), MutationKind::Create))
            .await
            .unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            OutboxEvent::Enqueued {
                key: entry.key,
                mutation_id: entry.mutation_id(),
                model_type: "Person".into(),
                model_id: "p1".into(),
            }
        );
        assert_eq!(events.recv().await.unwrap(), OutboxEvent::Status { pending: 1 });

        queue.remove_entry(&entry).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            OutboxEvent::Removed {
                mutation_id: entry.mutation_id()
            }
        );
        assert_eq!(events.recv().await.unwrap(), OutboxEvent::Status { pending: 0 });
    }

    #[tokio::test]
    async fn engine_origin_is_stored_but_not_observed() {
        let queue = queue();
        queue
            .enqueue(&MutationEvent::from_model(
                person("p1"),
                MutationKind::Update,
                Origin::SyncEngine,
            ))
            .await
            .unwrap();
        let local = queue
            .enqueue(&MutationEvent::local(person("p2"), MutationKind::Update))
            .await
            .unwrap();

        let mut stream = queue.observe();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, local);
        assert_eq!(queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn has_pending_tracks_identity() {
        let queue = queue();
        let event = MutationEvent::local(person("p1"), MutationKind::Update);
        queue.enqueue(&event).await.unwrap();

        assert!(queue.has_pending("p1").await.unwrap());
        assert!(!queue.has_pending("p2").await.unwrap());

        queue.remove(&event).await.unwrap();
        assert!(!queue.has_pending("p1").await.unwrap());
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn decode_restores_event() {
        let queue = queue();
        let event = MutationEvent::local(person("p1"), MutationKind::Delete);
        let entry = queue.enqueue(&event).await.unwrap();
        assert_eq!(queue.decode(&entry).unwrap(), event);
    }

    #[tokio::test]
    async fn stream_ends_when_queue_dropped() {
        let queue = queue();
        let mut stream = queue.observe();
        let next = tokio::spawn(async move { stream.next().await.is_none() });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(queue);

        let ended = tokio::time::timeout(Duration::from_secs(2), next)
            .await
            .unwrap()
            .unwrap();
        assert!(ended);
    }
}
