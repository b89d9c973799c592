use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use margo_domain::{ActualPhase, ComponentHealth, ComponentStatus, DeploymentId, DeploymentManifest, DriverKind};
use tracing::debug;

use crate::driver::Driver;
use crate::error::DriverError;

/// A stub driver that tracks installed deployments in memory and performs
/// no real I/O. Used by reconciler tests so they never shell out to `helm`
/// or `docker`.
pub struct LocalDriver {
    kind: DriverKind,
    installed: Mutex<HashMap<DeploymentId, DeploymentManifest>>,
}

impl LocalDriver {
    pub fn new(kind: DriverKind) -> Self {
        Self { kind, installed: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl Driver for LocalDriver {
    fn kind(&self) -> DriverKind {
        self.kind
    }

    async fn deploy(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<(), DriverError> {
        debug!(deployment_id = %id, "local: deploy");
        self.installed.lock().unwrap().insert(*id, manifest.clone());
        Ok(())
    }

    async fn update(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<(), DriverError> {
        debug!(deployment_id = %id, "local: update");
        self.installed.lock().unwrap().insert(*id, manifest.clone());
        Ok(())
    }

    async fn remove(&self, id: &DeploymentId) -> Result<(), DriverError> {
        debug!(deployment_id = %id, "local: remove");
        self.installed.lock().unwrap().remove(id);
        Ok(())
    }

    async fn exists(&self, id: &DeploymentId) -> Result<bool, DriverError> {
        Ok(self.installed.lock().unwrap().contains_key(id))
    }

    async fn status(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<Vec<ComponentStatus>, DriverError> {
        let installed = self.installed.lock().unwrap().contains_key(id);
        let phase = if installed { ActualPhase::Running } else { ActualPhase::Absent };
        let health = if installed { ComponentHealth::Healthy } else { ComponentHealth::Unknown };

        Ok(manifest
            .components
            .iter()
            .map(|c| ComponentStatus {
                component_name: c.name.clone(),
                image_or_chart_ref: c.image_or_chart_ref.clone(),
                phase,
                health,
                ports: vec![],
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> DeploymentManifest {
        DeploymentManifest {
            driver_kind: DriverKind::Helm,
            workload_ref: "oci://example/chart:1.0".to_string(),
            components: vec![margo_domain::Component { name: "web".to_string(), image_or_chart_ref: "oci://example/chart:1.0".to_string() }],
            parameters: vec![],
        }
    }

    #[tokio::test]
    async fn deploy_then_exists_is_true() {
        let driver = LocalDriver::new(DriverKind::Helm);
        let id = DeploymentId::new(uuid::Uuid::new_v4());
        driver.deploy(&id, &manifest()).await.unwrap();
        assert!(driver.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn remove_then_exists_is_false() {
        let driver = LocalDriver::new(DriverKind::Helm);
        let id = DeploymentId::new(uuid::Uuid::new_v4());
        driver.deploy(&id, &manifest()).await.unwrap();
        driver.remove(&id).await.unwrap();
        assert!(!driver.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn status_reports_absent_before_deploy() {
        let driver = LocalDriver::new(DriverKind::Helm);
        let id = DeploymentId::new(uuid::Uuid::new_v4());
        let status = driver.status(&id, &manifest()).await.unwrap();
        assert_eq!(status[0].phase, ActualPhase::Absent);
    }
}
