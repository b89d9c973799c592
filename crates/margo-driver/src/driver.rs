use async_trait::async_trait;
use margo_domain::{ComponentStatus, DeploymentId, DeploymentManifest, DriverKind};

use crate::error::DriverError;

/// Drives one workload runtime (Helm or Compose) to match a deployment
/// manifest. Implementations own the subprocess invocation; callers never
/// shell out directly.
#[async_trait]
pub trait Driver: Send + Sync {
    fn kind(&self) -> DriverKind;

    /// First-time install of `manifest` under `id`.
    async fn deploy(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<(), DriverError>;

    /// Reconcile an already-installed deployment to `manifest`'s desired
    /// state (new digest, changed parameters, or changed workload ref).
    async fn update(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<(), DriverError>;

    /// Tear the deployment down completely. Idempotent: removing an
    /// already-absent deployment is not an error.
    async fn remove(&self, id: &DeploymentId) -> Result<(), DriverError>;

    /// Whether the runtime currently has anything installed under `id`.
    async fn exists(&self, id: &DeploymentId) -> Result<bool, DriverError>;

    /// Current observed status of every component in `manifest`. Components
    /// the runtime doesn't report back are synthesised as `Absent`/`Unknown`
    /// so the returned set always matches the manifest's component list.
    async fn status(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<Vec<ComponentStatus>, DriverError>;
}
