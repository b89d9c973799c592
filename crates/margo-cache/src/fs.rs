use std::path::Path;

use rand::Rng;

use crate::error::CacheError;

/// Write `bytes` to `path` atomically: write to a temporary file in the same
/// directory, fsync it, then rename over `path`. Readers never observe a
/// partial write.
pub async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let dir = path.parent().ok_or_else(|| CacheError::Io {
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent"),
    })?;
    tokio::fs::create_dir_all(dir).await.map_err(|e| CacheError::Io {
        path: dir.display().to_string(),
        source: e,
    })?;

    let suffix: u64 = rand::thread_rng().gen();
    let tmp_path = dir.join(format!(".tmp-{suffix:016x}"));

    let mut file = tokio::fs::File::create(&tmp_path).await.map_err(|e| CacheError::Io {
        path: tmp_path.display().to_string(),
        source: e,
    })?;
    use tokio::io::AsyncWriteExt;
    file.write_all(bytes).await.map_err(|e| CacheError::Io {
        path: tmp_path.display().to_string(),
        source: e,
    })?;
    file.sync_all().await.map_err(|e| CacheError::Io {
        path: tmp_path.display().to_string(),
        source: e,
    })?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await.map_err(|e| CacheError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(())
}
