//! Test fixtures: sample models and outbox helpers.
//!
//! Provides a small schema and convenience constructors for outboxes that
//! can be "restarted" over the same bytes.

use mutsync_codec::{Model, ModelRegistry, MutationCodec, MutationEvent, MutationKind};
use mutsync_outbox::{LogOutboxStore, OutgoingMutationQueue};
use mutsync_storage::InMemoryBackend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A sample model keyed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    /// Identity.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Age in years.
    pub age: u32,
}

impl Model for Person {
    const MODEL_TYPE: &'static str = "Person";

    fn id(&self) -> String {
        self.id.clone()
    }
}

/// A second sample model, so tests cover more than one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Identity.
    pub id: String,
    /// ID of the authoring [`Person`].
    pub author_id: String,
    /// Title.
    pub title: String,
    /// Free-form tags.
    pub tags: Vec<String>,
}

impl Model for Post {
    const MODEL_TYPE: &'static str = "Post";

    fn id(&self) -> String {
        self.id.clone()
    }
}

/// A model that is deliberately left out of [`test_registry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unregistered {
    /// Identity.
    pub id: String,
}

impl Model for Unregistered {
    const MODEL_TYPE: &'static str = "Unregistered";

    fn id(&self) -> String {
        self.id.clone()
    }
}

/// Builds a [`Person`].
pub fn person(id: &str, name: &str) -> Person {
    Person {
        id: id.to_string(),
        name: name.to_string(),
        age: 30,
    }
}

/// Builds a [`Post`].
pub fn post(id: &str, author_id: &str, title: &str) -> Post {
    Post {
        id: id.to_string(),
        author_id: author_id.to_string(),
        title: title.to_string(),
        tags: Vec::new(),
    }
}

/// A registry holding [`Person`] and [`Post`].
pub fn test_registry() -> ModelRegistry {
    ModelRegistry::new().with::<Person>().with::<Post>()
}

/// A codec over [`test_registry`].
pub fn test_codec() -> MutationCodec {
    MutationCodec::new(test_registry())
}

/// A local-origin update event.
pub fn local_event<M: Model>(model: M) -> MutationEvent {
    MutationEvent::local(model, MutationKind::Update)
}

/// A local-origin event of the given kind.
pub fn local_event_of<M: Model>(model: M, kind: MutationKind) -> MutationEvent {
    MutationEvent::local(model, kind)
}

/// An in-memory outbox whose bytes outlive it.
pub struct TestOutbox {
    /// The queue under test.
    pub queue: OutgoingMutationQueue,
    /// The bytes behind the queue, shared with every reopened copy.
    pub backend: InMemoryBackend,
}

impl TestOutbox {
    /// Creates an empty in-memory outbox.
    pub fn memory() -> Self {
        Self::over(InMemoryBackend::new())
    }

    /// Opens an outbox over existing bytes.
    pub fn over(backend: InMemoryBackend) -> Self {
        let store = LogOutboxStore::open(Box::new(backend.clone()))
            .expect("Failed to open in-memory outbox");
        Self {
            queue: OutgoingMutationQueue::new(Arc::new(store), test_codec()),
            backend,
        }
    }

    /// Drops the queue and opens a fresh one over the same bytes.
    pub fn reopen(self) -> Self {
        let backend = self.backend.clone();
        drop(self);
        Self::over(backend)
    }
}

/// A file-backed outbox in a temporary directory.
pub struct FileOutbox {
    /// The queue under test.
    pub queue: OutgoingMutationQueue,
    path: PathBuf,
    _temp_dir: TempDir,
}

impl FileOutbox {
    /// Creates an empty outbox in a fresh temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("outbox.log");
        let queue =
            OutgoingMutationQueue::open_file(&path, test_codec()).expect("Failed to open outbox");
        Self {
            queue,
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the queue, releasing the file lock, and opens it again.
    pub fn reopen(self) -> Self {
        let Self {
            queue,
            path,
            _temp_dir,
        } = self;
        drop(queue);
        let queue =
            OutgoingMutationQueue::open_file(&path, test_codec()).expect("Failed to reopen outbox");
        Self {
            queue,
            path,
            _temp_dir,
        }
    }
}

impl Default for FileOutbox {
    fn default() -> Self {
        Self::new()
    }
}
