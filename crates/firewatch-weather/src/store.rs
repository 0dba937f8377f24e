//! Shared document store.
//!
//! Documents are JSON values addressed by slash-separated keys such as
//! `weather_data/all_locations`. Writes replace the whole document; there is
//! no merge. Every store offers a change feed: a new subscription first
//! receives the current document (if any), then each later write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use firewatch_core::StoreError;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::feed::{spawn_feed, ChangeCallback, PollingFeed, Subscription};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read. `Ok(None)` when the document does not exist.
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the document at `key`.
    async fn write(&self, key: &str, document: Value) -> Result<(), StoreError>;

    /// Register for changes to `key`, whichever writer makes them.
    fn subscribe(&self, key: &str, callback: ChangeCallback) -> Result<Subscription, StoreError>;
}

const CHANGE_BUFFER: usize = 64;

struct Slot {
    document: Option<Value>,
    changes: broadcast::Sender<Value>,
}

impl Slot {
    fn empty() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            document: None,
            changes,
        }
    }
}

/// In-process store with a push change feed.
///
/// Clones share the same documents, so several caches in one process can be
/// pointed at one `MemoryStore` to stand in for a shared backend.
#[derive(Clone, Default)]
pub struct MemoryStore {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("documents", &self.slots.lock().len())
            .finish()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.slots.lock().get(key).and_then(|slot| slot.document.clone()))
    }

    async fn write(&self, key: &str, document: Value) -> Result<(), StoreError> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.to_string()).or_insert_with(Slot::empty);
        slot.document = Some(document.clone());
        // Sent under the lock so receivers see writes in write order.
        // An error only means nobody is listening.
        let _ = slot.changes.send(document);
        Ok(())
    }

    fn subscribe(&self, key: &str, callback: ChangeCallback) -> Result<Subscription, StoreError> {
        let (current, mut changes) = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key.to_string()).or_insert_with(Slot::empty);
            (slot.document.clone(), slot.changes.subscribe())
        };

        let active = Arc::new(AtomicBool::new(true));
        let flag = active.clone();
        let key = key.to_string();

        spawn_feed(active, async move {
            if let Some(document) = current {
                if flag.load(Ordering::Acquire) {
                    callback(document);
                }
            }

            loop {
                match changes.recv().await {
                    Ok(document) => {
                        if !flag.load(Ordering::Acquire) {
                            break;
                        }
                        callback(document);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(key = %key, skipped, "change feed lagged, skipping to newest");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Store backed by one JSON file per key under a root directory.
///
/// Processes that share the directory share the documents. Writes go to a
/// temporary file that is renamed into place, so readers never observe a
/// partial document. The change feed polls.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    feed: PollingFeed,
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl FileStore {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            feed: PollingFeed::new(Self::DEFAULT_POLL_INTERVAL),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.feed = PollingFeed::new(interval);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let segments: Vec<&str> = key.split('/').collect();
        let invalid = |s: &&str| s.is_empty() || *s == "." || *s == ".." || s.contains('\\');
        if segments.iter().any(invalid) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }

        let mut path = self.root.clone();
        if let Some((last, parents)) = segments.split_last() {
            path.extend(parents);
            path.push(format!("{}.json", last));
        }
        Ok(path)
    }
}

async fn read_document(path: &Path) -> Result<Option<Value>, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key)?;
        read_document(&path).await
    }

    async fn write(&self, key: &str, document: Value) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = serde_json::to_string_pretty(&document)?;
        let temp = path.with_extension(format!(
            "json.{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        tokio::fs::write(&temp, contents).await?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        tracing::debug!(path = %path.display(), "wrote document");
        Ok(())
    }

    fn subscribe(&self, key: &str, callback: ChangeCallback) -> Result<Subscription, StoreError> {
        let path = Arc::new(self.path_for(key)?);
        self.feed.watch(
            move || {
                let path = path.clone();
                async move { read_document(&path).await }
            },
            callback,
        )
    }
}
