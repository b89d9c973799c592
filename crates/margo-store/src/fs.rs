use std::path::Path;

use rand::Rng;

use crate::error::StoreError;

/// Write `bytes` to `path` atomically: temp file in the same directory,
/// fsync, rename. Mirrors the cache crate's helper; kept local so this
/// crate doesn't need to depend on margo-cache for one function.
pub async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().ok_or_else(|| StoreError::Io {
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent"),
    })?;
    tokio::fs::create_dir_all(dir).await.map_err(|e| StoreError::Io {
        path: dir.display().to_string(),
        source: e,
    })?;

    let suffix: u64 = rand::thread_rng().gen();
    let tmp_path = dir.join(format!(".tmp-{suffix:016x}"));

    let mut file = tokio::fs::File::create(&tmp_path).await.map_err(|e| StoreError::Io {
        path: tmp_path.display().to_string(),
        source: e,
    })?;
    use tokio::io::AsyncWriteExt;
    file.write_all(bytes).await.map_err(|e| StoreError::Io {
        path: tmp_path.display().to_string(),
        source: e,
    })?;
    file.sync_all().await.map_err(|e| StoreError::Io {
        path: tmp_path.display().to_string(),
        source: e,
    })?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await.map_err(|e| StoreError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(())
}
