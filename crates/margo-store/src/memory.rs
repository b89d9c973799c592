use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::error::StoreError;
use crate::snapshot::{load_snapshot, write_snapshot};
use crate::store::StateStore;

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 1;

/// The sole `StateStore` implementation: an in-memory map guarded by a
/// single `RwLock`, with an optional debounced snapshot to disk so restarts
/// don't start from a completely blank state.
///
/// Subscriptions are served by a background task per call to `subscribe`
/// that diffs the current matching keys against what it last sent. Because
/// the diff always reflects the *current* map rather than a log of past
/// writes, a subscriber that's behind automatically collapses any number of
/// intermediate writes to a key into a single emission of its latest value —
/// the coalescing-under-backpressure behaviour spec.md §5 asks for.
pub struct MemoryStore {
    data: Arc<RwLock<HashMap<String, Value>>>,
    /// A bare version counter bumped on every mutation. `watch` (unlike
    /// `Notify`) remembers the latest value against each receiver's own
    /// last-seen mark, so a subscriber that calls `changed()` any time after
    /// a `send_modify` still observes it — no wakeup can be lost the way
    /// `Notify::notify_waiters` drops one fired before a waiter registered.
    changed: watch::Sender<u64>,
    dirty: Arc<AtomicBool>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    /// An empty, non-persistent store. Used by components under test and by
    /// any caller that doesn't need restarts to survive.
    pub fn new_in_memory() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            changed: watch::channel(0u64).0,
            dirty: Arc::new(AtomicBool::new(false)),
            snapshot_path: None,
        }
    }

    /// Load the snapshot at `snapshot_path` (or start empty if it's absent
    /// or unreadable) and spawn a background task that writes a fresh
    /// snapshot at most once per `debounce`, only when something changed.
    pub async fn load(snapshot_path: PathBuf, debounce: Duration) -> Self {
        let initial = load_snapshot(&snapshot_path).await;
        debug!(entries = initial.len(), path = %snapshot_path.display(), "loaded store snapshot");

        let store = Self {
            data: Arc::new(RwLock::new(initial)),
            changed: watch::channel(0u64).0,
            dirty: Arc::new(AtomicBool::new(false)),
            snapshot_path: Some(snapshot_path),
        };

        store.spawn_snapshot_task(debounce);
        store
    }

    fn spawn_snapshot_task(&self, debounce: Duration) {
        let Some(path) = self.snapshot_path.clone() else {
            return;
        };
        let data = self.data.clone();
        let dirty = self.dirty.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(debounce).await;
                if dirty.swap(false, Ordering::SeqCst) {
                    let snapshot = data.read().await.clone();
                    if let Err(err) = write_snapshot(&path, &snapshot).await {
                        tracing::warn!(%err, path = %path.display(), "failed to write store snapshot");
                    }
                }
            }
        });
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        self.changed.send_modify(|v| *v = v.wrapping_add(1));
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.data.write().await.insert(key.to_string(), value);
        self.mark_dirty();
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let removed = self.data.write().await.remove(key).is_some();
        if removed {
            self.mark_dirty();
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let guard = self.data.read().await;
        let mut out: Vec<(String, Value)> =
            guard.iter().filter(|(k, _)| k.starts_with(prefix)).map(|(k, v)| (k.clone(), v.clone())).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn subscribe(&self, prefix: &str) -> ReceiverStream<(String, Option<Value>)> {
        let prefix = prefix.to_string();
        let data = self.data.clone();
        // `subscribe()` marks the channel's current version as this
        // receiver's baseline; any `send_modify` after that point — even
        // one that lands between our map read below and the `changed()`
        // call at the bottom of the loop — is remembered by the channel
        // and makes the next `changed()` return immediately instead of
        // waiting on a notification that already fired.
        let mut version_rx = self.changed.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut last_seen: HashMap<String, Option<Value>> = HashMap::new();
            loop {
                let current: HashMap<String, Value> = {
                    let guard = data.read().await;
                    guard.iter().filter(|(k, _)| k.starts_with(&prefix)).map(|(k, v)| (k.clone(), v.clone())).collect()
                };

                for (key, value) in &current {
                    let as_some = Some(value.clone());
                    if last_seen.get(key) != Some(&as_some) {
                        if tx.send((key.clone(), as_some.clone())).await.is_err() {
                            return;
                        }
                        last_seen.insert(key.clone(), as_some);
                    }
                }

                let gone: Vec<String> = last_seen
                    .iter()
                    .filter(|(k, v)| !current.contains_key(k.as_str()) && v.is_some())
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in gone {
                    if tx.send((key.clone(), None)).await.is_err() {
                        return;
                    }
                    last_seen.insert(key, None);
                }

                if version_rx.changed().await.is_err() {
                    return;
                }
            }
        });

        ReceiverStream::new(rx)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        self.dirty.store(false, Ordering::SeqCst);
        let snapshot = self.data.read().await.clone();
        write_snapshot(path, &snapshot).await
    }
}
