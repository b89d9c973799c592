use async_trait::async_trait;
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::StoreError;

/// The agent's sole coordination mechanism between reconciler stages
/// (poller, executor, monitor, reporter): an in-memory key/value map with
/// prefix listing and prefix subscriptions. Keys are plain strings;
/// components own their own namespacing convention (e.g.
/// `desired/<deployment-id>`, `record/<deployment-id>`).
///
/// `subscribe` immediately replays every currently-matching key once, then
/// yields further events as they happen, so a caller never needs a separate
/// `list` call to learn the state as of subscription time.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All `(key, value)` pairs whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError>;

    /// A stream of `(key, new_value)` for every key under `prefix`, `None`
    /// meaning the key was deleted. Writes to a single key are observed by
    /// a given subscriber in the order they happened; a subscriber that
    /// falls behind sees only the latest value per key, never a full replay
    /// of every intermediate write (spec.md §4.C, §5).
    fn subscribe(&self, prefix: &str) -> ReceiverStream<(String, Option<Value>)>;

    /// Force an immediate snapshot write, bypassing the debounce. Used by
    /// the supervisor during graceful shutdown.
    async fn flush(&self) -> Result<(), StoreError>;
}
