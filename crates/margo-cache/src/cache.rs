use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use margo_domain::Digest;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::fs::atomic_write;

/// The two content-addressed artifact kinds the agent fetches from the WFM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Bundle,
    Manifest,
}

impl CacheKind {
    fn dir_name(&self) -> &'static str {
        match self {
            CacheKind::Bundle => "bundles",
            CacheKind::Manifest => "deployments",
        }
    }
}

type InflightKey = (CacheKind, String, Digest);

/// Content-addressed cache for fetched bundles and manifest documents, keyed
/// by `(kind, key, digest)`. Enforces the Exact Bytes Rule: a consumer with a
/// digest either gets the identical bytes back or a typed failure, never
/// silently different bytes (spec.md §4.A).
pub struct ContentCache {
    root: PathBuf,
    inflight: Mutex<HashMap<InflightKey, Arc<Notify>>>,
}

impl ContentCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    fn key_dir(&self, kind: CacheKind, key: &str) -> PathBuf {
        self.root.join(kind.dir_name()).join(key)
    }

    /// Filename equals the full digest (`sha256:<hex>`), matching spec.md
    /// §6's documented on-disk layout.
    fn entry_path(&self, kind: CacheKind, key: &str, digest: &Digest) -> PathBuf {
        self.key_dir(kind, key).join(digest.as_str())
    }

    fn latest_path(&self, kind: CacheKind, key: &str) -> PathBuf {
        self.key_dir(kind, key).join("LATEST")
    }

    /// The digest of the most recently stored entry for `(kind, key)`, if any.
    pub async fn get_last_digest(&self, kind: CacheKind, key: &str) -> Option<Digest> {
        let contents = tokio::fs::read_to_string(self.latest_path(kind, key)).await.ok()?;
        Digest::parse(contents.trim()).ok()
    }

    /// Read back the bytes stored for `(kind, key, digest)`. Recomputes the
    /// SHA-256 of the stored bytes and compares to `digest`; on mismatch the
    /// entry is deleted and `Corrupt` is returned.
    pub async fn get(&self, kind: CacheKind, key: &str, digest: &Digest) -> Result<Vec<u8>, CacheError> {
        let path = self.entry_path(kind, key, digest);
        let bytes = tokio::fs::read(&path).await.map_err(|_| CacheError::NotFound(key.to_string()))?;

        if !digest.matches(&bytes) {
            warn!(key, digest = %digest, "cache entry corrupt, deleting");
            let _ = tokio::fs::remove_file(&path).await;
            return Err(CacheError::Corrupt { key: key.to_string() });
        }
        Ok(bytes)
    }

    /// Store `bytes` under `(kind, key, digest)`. The SHA-256 of `bytes` must
    /// equal `digest` before any write is attempted. Idempotent: storing the
    /// same `(key, digest)` twice, even concurrently, performs at most one
    /// disk write.
    pub async fn store(&self, kind: CacheKind, key: &str, digest: &Digest, bytes: &[u8]) -> Result<(), CacheError> {
        if !digest.matches(bytes) {
            let computed = Digest::of(bytes);
            return Err(CacheError::DigestMismatch {
                expected: digest.to_string(),
                computed: computed.to_string(),
            });
        }

        let inflight_key: InflightKey = (kind, key.to_string(), digest.clone());
        let notify = {
            let mut guard = self.inflight.lock().await;
            if let Some(existing) = guard.get(&inflight_key) {
                let notify = existing.clone();
                drop(guard);
                notify.notified().await;
                return Ok(());
            }
            let notify = Arc::new(Notify::new());
            guard.insert(inflight_key.clone(), notify.clone());
            notify
        };

        let result = self.store_inner(kind, key, digest, bytes).await;

        self.inflight.lock().await.remove(&inflight_key);
        notify.notify_waiters();
        result
    }

    async fn store_inner(&self, kind: CacheKind, key: &str, digest: &Digest, bytes: &[u8]) -> Result<(), CacheError> {
        let path = self.entry_path(kind, key, digest);
        if tokio::fs::metadata(&path).await.is_ok() {
            debug!(key, digest = %digest, "cache entry already present, skipping write");
        } else {
            atomic_write(&path, bytes).await?;
        }
        atomic_write(&self.latest_path(kind, key), digest.as_str().as_bytes()).await?;
        Ok(())
    }

    /// Delete one specific entry.
    pub async fn delete(&self, kind: CacheKind, key: &str, digest: &Digest) -> Result<(), CacheError> {
        let path = self.entry_path(kind, key, digest);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    /// Delete every entry under `(kind, key)`.
    pub async fn clear(&self, kind: CacheKind, key: &str) -> Result<(), CacheError> {
        let dir = self.key_dir(kind, key);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io {
                path: dir.display().to_string(),
                source: e,
            }),
        }
    }
}
