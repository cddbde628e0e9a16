//! The sync engine: capture and publish pipelines.

use crate::adapter::{ChangeStream, LocalStorageAdapter, StorageChange};
use crate::config::{ExhaustedPolicy, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::state::{EngineState, SyncStats};
use crate::transport::RemoteTransport;
use futures::StreamExt;
use mutsync_codec::{MutationKind, MutationRecord, Origin};
use mutsync_outbox::{MutationStream, OutgoingMutationQueue, QueueEntry};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// `(model_type, model_id)`: publishes are serialized per identity.
type Identity = (String, String);

fn identity_of(record: &MutationRecord) -> Identity {
    (record.model_type.clone(), record.model_id.clone())
}

/// How one entry's delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Published and removed.
    Delivered,
    /// Moved to the dead-letter store and removed.
    DeadLettered,
    /// Left in the outbox after failing.
    Retained,
    /// Left in the outbox because it failed validation.
    Rejected,
    /// Left in the outbox because the engine is stopping.
    Abandoned,
}

impl Outcome {
    /// Whether later entries for the same identity must wait for the next run.
    fn blocks_identity(self) -> bool {
        matches!(self, Outcome::Retained | Outcome::Rejected)
    }
}

struct RunHandle {
    shutdown: Arc<watch::Sender<bool>>,
    capture: JoinHandle<()>,
    publish: JoinHandle<()>,
}

impl RunHandle {
    async fn shutdown_and_join(self) {
        self.shutdown.send_replace(true);
        if let Err(err) = self.capture.await {
            error!(error = %err, "capture pipeline panicked");
        }
        if let Err(err) = self.publish.await {
            error!(error = %err, "publish pipeline panicked");
        }
    }
}

struct EngineInner<A, T> {
    config: SyncConfig,
    queue: Arc<OutgoingMutationQueue>,
    adapter: Arc<A>,
    transport: Arc<T>,
    state: watch::Sender<EngineState>,
    stats: RwLock<SyncStats>,
    events: broadcast::Sender<SyncEvent>,
}

/// Moves local mutations to the remote through a durable outbox.
///
/// Two pipelines run while the engine is started:
///
/// - **capture**: local storage changes with `Origin::Local` are enqueued in
///   the order they arrive; `Origin::SyncEngine` changes are dropped, which
///   keeps the engine's own write-backs from looping back to the remote
/// - **publish**: outbox entries (stored ones first) are validated, sent
///   through the transport, written back when the remote echoes them, and
///   removed once delivered
///
/// At most one publish per `(model_type, model_id)` is in flight; different
/// identities are published in parallel up to
/// [`SyncConfig::max_concurrent_publishes`].
///
/// # Example
///
/// ```rust,no_run
/// use mutsync_codec::{ModelRegistry, MutationCodec};
/// use mutsync_outbox::OutgoingMutationQueue;
/// use mutsync_sync_engine::{InMemoryStorageAdapter, MockTransport, SyncConfig, SyncEngine};
/// use std::sync::Arc;
///
/// # async fn demo() -> mutsync_sync_engine::SyncResult<()> {
/// let codec = MutationCodec::new(ModelRegistry::new());
/// let queue = Arc::new(OutgoingMutationQueue::in_memory(codec)?);
/// let engine = SyncEngine::new(
///     SyncConfig::default(),
///     queue,
///     Arc::new(InMemoryStorageAdapter::new()),
///     Arc::new(MockTransport::new()),
/// );
///
/// engine.start().await?;
/// // ... application writes go through the adapter ...
/// engine.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct SyncEngine<A, T>
where
    A: LocalStorageAdapter + 'static,
    T: RemoteTransport + 'static,
{
    inner: Arc<EngineInner<A, T>>,
    run: AsyncMutex<Option<RunHandle>>,
}

impl<A, T> SyncEngine<A, T>
where
    A: LocalStorageAdapter + 'static,
    T: RemoteTransport + 'static,
{
    /// Creates a stopped engine.
    pub fn new(
        config: SyncConfig,
        queue: Arc<OutgoingMutationQueue>,
        adapter: Arc<A>,
        transport: Arc<T>,
    ) -> Self {
        let (state, _) = watch::channel(EngineState::Stopped);
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            inner: Arc::new(EngineInner {
                config,
                queue,
                adapter,
                transport,
                state,
                stats: RwLock::new(SyncStats::default()),
                events,
            }),
            run: AsyncMutex::new(None),
        }
    }

    /// Starts both pipelines.
    ///
    /// Changes made to local storage after this returns are captured.
    /// Stored outbox entries are replayed before live ones.
    ///
    /// # Errors
    ///
    /// [`SyncError::AlreadyRunning`] if the engine is running or stopping.
    pub async fn start(&self) -> SyncResult<()> {
        let mut run = self.run.lock().await;
        if !self.state().can_start() {
            return Err(SyncError::AlreadyRunning);
        }
        if let Some(previous) = run.take() {
            previous.shutdown_and_join().await;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown = Arc::new(shutdown_tx);
        let changes = self.inner.adapter.observe_changes();
        let outbox = self.inner.queue.observe();

        self.inner.set_state(EngineState::Running);
        self.inner.emit(SyncEvent::Started);
        info!(
            max_concurrent_publishes = self.inner.config.max_concurrent_publishes,
            "sync engine started"
        );

        let capture = tokio::spawn(run_capture(
            Arc::clone(&self.inner),
            changes,
            Arc::clone(&shutdown),
            shutdown_rx.clone(),
        ));
        let publish = tokio::spawn(run_publish(
            Arc::clone(&self.inner),
            outbox,
            Arc::clone(&shutdown),
            shutdown_rx,
        ));

        *run = Some(RunHandle {
            shutdown,
            capture,
            publish,
        });
        Ok(())
    }

    /// Stops both pipelines and waits for in-flight work to settle.
    ///
    /// In-flight remote calls are allowed to finish; pending retries are
    /// abandoned and their entries stay queued. Once this returns the engine
    /// makes no further outbox writes. Stopping a stopped engine does nothing.
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        let Some(handle) = run.take() else {
            return;
        };

        if self.state().is_running() {
            self.inner.set_state(EngineState::Stopping);
        }
        handle.shutdown_and_join().await;

        self.inner.set_state(EngineState::Stopped);
        self.inner.emit(SyncEvent::Stopped);
        info!("sync engine stopped");
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.inner.state.borrow()
    }

    /// Subscribes to lifecycle state changes.
    pub fn state_changes(&self) -> watch::Receiver<EngineState> {
        self.inner.state.subscribe()
    }

    /// Returns a snapshot of the engine counters.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Subscribes to engine activity events.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the outbox.
    pub fn queue(&self) -> &Arc<OutgoingMutationQueue> {
        &self.inner.queue
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }
}

impl<A, T> Drop for SyncEngine<A, T>
where
    A: LocalStorageAdapter + 'static,
    T: RemoteTransport + 'static,
{
    fn drop(&mut self) {
        if let Some(handle) = self.run.get_mut().as_ref() {
            handle.shutdown.send_replace(true);
        }
    }
}

impl<A, T> EngineInner<A, T>
where
    A: LocalStorageAdapter + 'static,
    T: RemoteTransport + 'static,
{
    fn set_state(&self, state: EngineState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    fn note_error(&self, error: &SyncError) {
        self.stats.write().last_error = Some(error.to_string());
    }

    /// Shuts both pipelines down after a collaborator failure.
    fn fail(&self, error: SyncError, shutdown: &watch::Sender<bool>) {
        error!(error = %error, "sync engine failed");
        self.note_error(&error);
        if !shutdown.send_replace(true) {
            self.set_state(EngineState::Failed);
            self.emit(SyncEvent::Failed {
                reason: error.to_string(),
            });
        }
    }

    async fn capture(&self, change: StorageChange) {
        let model_type = change.item.model_type().to_owned();
        let model_id = change.item.model_id();

        if change.origin == Origin::SyncEngine {
            debug!(%model_type, %model_id, kind = %change.kind, "skipping engine-originated change");
            self.stats.write().echoes_skipped += 1;
            self.emit(SyncEvent::EchoSkipped {
                model_type,
                model_id,
            });
            return;
        }

        let event = change.into_event();
        match self.queue.enqueue(&event).await {
            Ok(entry) => {
                self.stats.write().captured += 1;
                self.emit(SyncEvent::Enqueued {
                    mutation_id: entry.mutation_id(),
                    model_type,
                    model_id,
                });
            }
            Err(err) => {
                let err = SyncError::from(err);
                error!(%model_type, %model_id, error = %err, "failed to enqueue local change");
                {
                    let mut stats = self.stats.write();
                    stats.enqueue_failures += 1;
                    stats.last_error = Some(err.to_string());
                }
                self.emit(SyncEvent::EnqueueFailed {
                    model_type,
                    model_id,
                    error: err.to_string(),
                });
            }
        }
    }

    /// Validates, publishes, writes back, and removes one entry.
    async fn deliver(&self, entry: QueueEntry, mut shutdown: watch::Receiver<bool>) -> Outcome {
        let mutation_id = entry.mutation_id();

        if let Err(err) = self.queue.decode(&entry) {
            error!(
                %mutation_id,
                model_type = %entry.record.model_type,
                model_id = %entry.record.model_id,
                error = %err,
                "rejecting undecodable outbox record"
            );
            {
                let mut stats = self.stats.write();
                stats.rejected += 1;
                stats.last_error = Some(err.to_string());
            }
            self.emit(SyncEvent::RecordRejected {
                mutation_id,
                error: err.to_string(),
            });
            return Outcome::Rejected;
        }

        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            if *shutdown.borrow() {
                return Outcome::Abandoned;
            }

            let result = match tokio::time::timeout(
                self.config.publish_timeout,
                self.transport.publish(&entry.record),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout),
            };

            let err = match result {
                Ok(response) => {
                    if let Some(echo) = response.echo {
                        if let Err(err) = self.write_back(echo).await {
                            warn!(%mutation_id, error = %err, "failed to write back publish echo");
                            self.record_failure(mutation_id, &err);
                            return Outcome::Retained;
                        }
                    }
                    return self.complete(&entry, attempt).await;
                }
                Err(err) => err,
            };

            let retryable = err.is_retryable();
            warn!(
                %mutation_id,
                model_type = %entry.record.model_type,
                model_id = %entry.record.model_id,
                attempt,
                retryable,
                error = %err,
                "publish failed"
            );
            self.record_failure(mutation_id, &err);

            if !retryable || attempt >= max_attempts {
                return self.exhausted(&entry, attempt).await;
            }

            let delay = self.config.retry.delay_for_attempt(attempt);
            attempt += 1;
            self.stats.write().retries += 1;
            self.emit(SyncEvent::Retrying {
                mutation_id,
                attempt,
                delay,
            });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return Outcome::Abandoned,
            }
        }
    }

    fn record_failure(&self, mutation_id: uuid::Uuid, err: &SyncError) {
        {
            let mut stats = self.stats.write();
            stats.publish_failures += 1;
            stats.last_error = Some(err.to_string());
        }
        self.emit(SyncEvent::PublishFailed {
            mutation_id,
            error: err.to_string(),
            retryable: err.is_retryable(),
        });
    }

    async fn complete(&self, entry: &QueueEntry, attempts: u32) -> Outcome {
        let mutation_id = entry.mutation_id();
        if let Err(err) = self.queue.remove_entry(entry).await {
            let err = SyncError::from(err);
            error!(%mutation_id, error = %err, "published entry could not be removed; it will be sent again");
            self.note_error(&err);
            return Outcome::Retained;
        }

        {
            let mut stats = self.stats.write();
            stats.published += 1;
            stats.last_publish_time = Some(Instant::now());
        }
        debug!(
            %mutation_id,
            model_type = %entry.record.model_type,
            model_id = %entry.record.model_id,
            attempts,
            "published mutation"
        );
        self.emit(SyncEvent::Published {
            mutation_id,
            attempts,
        });
        Outcome::Delivered
    }

    async fn exhausted(&self, entry: &QueueEntry, attempts: u32) -> Outcome {
        let mutation_id = entry.mutation_id();
        let store = match &self.config.exhausted_policy {
            ExhaustedPolicy::KeepQueued => {
                warn!(%mutation_id, attempts, "giving up for this run; entry stays queued");
                return Outcome::Retained;
            }
            ExhaustedPolicy::DeadLetter(store) => Arc::clone(store),
        };

        let record = entry.record.clone();
        let stored = tokio::task::spawn_blocking(move || store.put(&record)).await;
        match stored {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                error!(%mutation_id, error = %err, "failed to write dead letter; entry stays queued");
                self.note_error(&SyncError::from(err));
                return Outcome::Retained;
            }
            Err(err) => {
                error!(%mutation_id, error = %err, "dead letter worker failed; entry stays queued");
                return Outcome::Retained;
            }
        }

        if let Err(err) = self.queue.remove_entry(entry).await {
            error!(%mutation_id, error = %err, "dead-lettered entry could not be removed");
            self.note_error(&SyncError::from(err));
            return Outcome::Retained;
        }

        warn!(%mutation_id, attempts, "moved entry to dead-letter store");
        self.stats.write().dead_lettered += 1;
        self.emit(SyncEvent::DeadLettered { mutation_id });
        Outcome::DeadLettered
    }

    /// Applies the remote's echo to local storage as an engine write.
    async fn write_back(&self, echo: MutationRecord) -> SyncResult<()> {
        let echo = MutationRecord {
            origin: Origin::SyncEngine,
            ..echo
        };
        let event = self.queue.codec().decode(&echo)?;
        let item = Arc::clone(event.item());
        match event.kind() {
            MutationKind::Delete => self.adapter.delete(item, Origin::SyncEngine).await?,
            MutationKind::Create | MutationKind::Update => {
                self.adapter.save(item, Origin::SyncEngine).await?
            }
        }
        Ok(())
    }
}

async fn run_capture<A, T>(
    inner: Arc<EngineInner<A, T>>,
    mut changes: ChangeStream,
    shutdown_tx: Arc<watch::Sender<bool>>,
    mut shutdown: watch::Receiver<bool>,
) where
    A: LocalStorageAdapter + 'static,
    T: RemoteTransport + 'static,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = changes.next() => next,
        };

        match next {
            Some(Ok(change)) => inner.capture(change).await,
            Some(Err(err)) => {
                inner.fail(SyncError::StorageUnavailable(err.to_string()), &shutdown_tx);
                break;
            }
            None => {
                inner.fail(
                    SyncError::StorageUnavailable("change feed ended".into()),
                    &shutdown_tx,
                );
                break;
            }
        }
    }
    debug!("capture pipeline exited");
}

async fn run_publish<A, T>(
    inner: Arc<EngineInner<A, T>>,
    mut outbox: MutationStream,
    shutdown_tx: Arc<watch::Sender<bool>>,
    mut shutdown: watch::Receiver<bool>,
) where
    A: LocalStorageAdapter + 'static,
    T: RemoteTransport + 'static,
{
    let limiter = Arc::new(Semaphore::new(inner.config.max_concurrent_publishes.max(1)));
    let mut tasks: JoinSet<(Identity, Outcome)> = JoinSet::new();
    // An identity is present while one of its entries is in flight; the
    // deque holds the entries waiting behind it.
    let mut busy: HashMap<Identity, VecDeque<QueueEntry>> = HashMap::new();
    let mut blocked: HashSet<Identity> = HashSet::new();

    let worker_shutdown = shutdown.clone();
    let spawn = |tasks: &mut JoinSet<(Identity, Outcome)>, entry: QueueEntry| {
        let inner = Arc::clone(&inner);
        let limiter = Arc::clone(&limiter);
        let shutdown = worker_shutdown.clone();
        tasks.spawn(async move {
            let identity = identity_of(&entry.record);
            let outcome = match limiter.acquire_owned().await {
                Ok(_permit) => inner.deliver(entry, shutdown).await,
                Err(_) => Outcome::Abandoned,
            };
            (identity, outcome)
        });
    };

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                let (identity, outcome) = match joined {
                    Ok(done) => done,
                    Err(err) => {
                        inner.fail(
                            SyncError::StorageUnavailable(format!("publish worker failed: {err}")),
                            &shutdown_tx,
                        );
                        break;
                    }
                };

                if outcome.blocks_identity() {
                    let held = busy.remove(&identity).map_or(0, |waiting| waiting.len());
                    warn!(
                        model_type = %identity.0,
                        model_id = %identity.1,
                        held,
                        "holding later mutations for this object until the next run"
                    );
                    blocked.insert(identity);
                    continue;
                }

                let next = busy.get_mut(&identity).and_then(VecDeque::pop_front);
                match next {
                    Some(entry) => spawn(&mut tasks, entry),
                    None => {
                        busy.remove(&identity);
                    }
                }
            }
            next = outbox.next() => match next {
                Some(Ok(entry)) => {
                    let identity = identity_of(&entry.record);
                    if blocked.contains(&identity) {
                        continue;
                    }
                    match busy.get_mut(&identity) {
                        Some(waiting) => waiting.push_back(entry),
                        None => {
                            busy.insert(identity, VecDeque::new());
                            spawn(&mut tasks, entry);
                        }
                    }
                }
                Some(Err(err)) => {
                    inner.fail(SyncError::Outbox(err), &shutdown_tx);
                    break;
                }
                None => {
                    inner.fail(
                        SyncError::StorageUnavailable("outbox stream ended".into()),
                        &shutdown_tx,
                    );
                    break;
                }
            },
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            error!(error = %err, "publish worker failed during shutdown");
        }
    }
    debug!("publish pipeline exited");
}
