use margo_domain::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache entry not found for key '{0}'")]
    NotFound(String),

    #[error("cache entry for key '{key}' is corrupt: stored bytes do not match digest")]
    Corrupt { key: String },

    #[error("digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: String, computed: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::NotFound(_) => ErrorKind::NotFound,
            CacheError::Corrupt { .. } => ErrorKind::Corrupt,
            CacheError::DigestMismatch { .. } => ErrorKind::DigestMismatch,
            CacheError::Io { .. } => ErrorKind::Corrupt,
        }
    }
}
