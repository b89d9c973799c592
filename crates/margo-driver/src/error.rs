use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("deploy failed: {0}")]
    DeployFailed(String),

    #[error("remove failed: {0}")]
    RemoveFailed(String),

    #[error("status query failed: {0}")]
    StatusFailed(String),

    #[error("internal driver error: {0}")]
    Internal(String),

    #[error("no driver registered for {0}")]
    DriverNotConfigured(margo_domain::DriverKind),
}

impl DriverError {
    pub fn kind(&self) -> margo_domain::ErrorKind {
        margo_domain::ErrorKind::Driver
    }
}
