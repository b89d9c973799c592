use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use sha2::{Digest as _, Sha256};
use tracing::warn;

use crate::error::StoreError;
use crate::fs::atomic_write;

/// Serialise `data` to JSON, append a trailing line with the SHA-256 of the
/// JSON bytes, and write the result atomically to `path`.
pub async fn write_snapshot(path: &Path, data: &HashMap<String, Value>) -> Result<(), StoreError> {
    let json = serde_json::to_vec(data)?;
    let checksum = hex_digest(&json);

    let mut out = json;
    out.push(b'\n');
    out.extend_from_slice(checksum.as_bytes());

    atomic_write(path, &out).await
}

/// Read back a snapshot written by [`write_snapshot`]. Returns an empty map
/// if the file is absent, truncated, malformed JSON, or its trailing
/// checksum doesn't match — a corrupt or missing snapshot is never fatal,
/// the store just starts cold (spec.md §4.C).
pub async fn load_snapshot(path: &Path) -> HashMap<String, Value> {
    match load_snapshot_inner(path).await {
        Ok(data) => data,
        Err(reason) => {
            if path_exists(path).await {
                warn!(path = %path.display(), %reason, "discarding unreadable snapshot, starting empty");
            }
            HashMap::new()
        }
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

async fn load_snapshot_inner(path: &Path) -> Result<HashMap<String, Value>, String> {
    let bytes = tokio::fs::read(path).await.map_err(|e| e.to_string())?;

    let newline_at = bytes.iter().rposition(|b| *b == b'\n').ok_or("missing checksum line")?;
    let (json, rest) = bytes.split_at(newline_at);
    let checksum = std::str::from_utf8(&rest[1..]).map_err(|e| e.to_string())?.trim();

    let expected = hex_digest(json);
    if checksum != expected {
        return Err("checksum mismatch".to_string());
    }

    serde_json::from_slice(json).map_err(|e| e.to_string())
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Default snapshot file name under the configured data directory.
pub fn default_snapshot_path(data_dir: impl Into<PathBuf>) -> PathBuf {
    data_dir.into().join("snapshot.json")
}
