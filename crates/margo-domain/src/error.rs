use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid digest '{0}': expected sha256:<64 hex chars>")]
    InvalidDigest(String),

    #[error("invalid device client id")]
    InvalidDeviceClientId,
}
