use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use uuid::Uuid;

use crate::error::DomainError;

/// Opaque identifier assigned by the WFM at onboarding. Stable for the
/// device's lifetime; persisted to `data/client_id`; never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceClientId(pub String);

impl DeviceClientId {
    pub fn new(s: impl Into<String>) -> Self {
        DeviceClientId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The WFM-issued UUID primary key for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentId(pub Uuid);

impl DeploymentId {
    pub fn new(id: Uuid) -> Self {
        DeploymentId(id)
    }
}

impl std::fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `sha256:<64 hex chars>` content digest. The Exact Bytes Rule's currency:
/// given a digest, a consumer either gets back the identical bytes or a
/// typed failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Parse and validate a `sha256:<hex>` string.
    pub fn parse(s: impl Into<String>) -> Result<Self, DomainError> {
        let s = s.into();
        let hex = s
            .strip_prefix("sha256:")
            .ok_or_else(|| DomainError::InvalidDigest(s.clone()))?;
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidDigest(s));
        }
        Ok(Digest(s))
    }

    /// Compute the digest of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        let hash = Sha256::digest(bytes);
        Digest(format!("sha256:{:x}", hash))
    }

    /// Verify that `bytes` hashes to this digest.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        Digest::of(bytes) == *self
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hex portion without the `sha256:` prefix, used as a filesystem
    /// path segment.
    pub fn hex(&self) -> &str {
        &self.0["sha256:".len()..]
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Digest {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Digest::parse(value)
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.0
    }
}
