use thiserror::Error;

#[derive(Debug, Error)]
pub enum WfmError {
    #[error("transport error talking to WFM: {0}")]
    Transport(String),

    #[error("WFM returned an unexpected response shape: {0}")]
    Protocol(String),

    #[error("fetched bytes don't match the requested digest (expected {expected}, computed {computed})")]
    DigestMismatch { expected: String, computed: String },

    #[error("duplicate onboarding signature")]
    DuplicateSignature,

    #[error("WFM rejected the request with status {0}")]
    Rejected(u16),
}

impl WfmError {
    pub fn kind(&self) -> margo_domain::ErrorKind {
        match self {
            WfmError::Transport(_) | WfmError::Rejected(_) => margo_domain::ErrorKind::Transport,
            WfmError::Protocol(_) | WfmError::DuplicateSignature => margo_domain::ErrorKind::ManifestInvalid,
            WfmError::DigestMismatch { .. } => margo_domain::ErrorKind::DigestMismatch,
        }
    }
}

impl From<reqwest::Error> for WfmError {
    fn from(e: reqwest::Error) -> Self {
        WfmError::Transport(e.to_string())
    }
}
