use std::path::PathBuf;

use async_trait::async_trait;
use margo_domain::{ActualPhase, ComponentHealth, ComponentStatus, DeploymentId, DeploymentManifest, DriverKind};
use serde::Deserialize;
use tracing::debug;

use crate::driver::Driver;
use crate::error::DriverError;
use crate::subprocess::run;

/// Drives workloads with `helm upgrade --install` / `helm uninstall`.
///
/// Each deployment gets its own release, named deterministically from its
/// id, and its own workspace directory holding the rendered `values.yaml`.
pub struct HelmDriver {
    workspace_root: PathBuf,
    namespace: String,
    binary: String,
}

impl HelmDriver {
    pub fn new(workspace_root: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            namespace: namespace.into(),
            binary: "helm".to_string(),
        }
    }

    /// Override the binary invoked (used by tests to point at a stub script).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn release_name(&self, id: &DeploymentId) -> String {
        format!("margo-{}", id.0.as_simple())
    }

    fn workspace_dir(&self, id: &DeploymentId) -> PathBuf {
        self.workspace_root.join(id.0.as_simple().to_string())
    }

    /// Merge every component's rendered `values` tree into one document.
    /// Single-component manifests render flat at the top level; multi-component
    /// manifests nest under each component's name, matching the umbrella-chart
    /// convention of keying subchart values by subchart name.
    fn render_values(&self, manifest: &DeploymentManifest) -> serde_json::Value {
        if manifest.components.len() == 1 {
            return manifest.render_parameters(&manifest.components[0].name);
        }
        let mut root = serde_json::Map::new();
        for component in &manifest.components {
            root.insert(component.name.clone(), manifest.render_parameters(&component.name));
        }
        serde_json::Value::Object(root)
    }

    async fn write_values_file(&self, workdir: &PathBuf, manifest: &DeploymentManifest) -> Result<PathBuf, DriverError> {
        tokio::fs::create_dir_all(workdir)
            .await
            .map_err(|e| DriverError::Internal(format!("create workspace dir: {e}")))?;

        let values = self.render_values(manifest);
        let yaml = serde_yaml::to_string(&values).map_err(|e| DriverError::Internal(format!("render values.yaml: {e}")))?;

        let path = workdir.join("values.yaml");
        tokio::fs::write(&path, yaml).await.map_err(|e| DriverError::Internal(format!("write values.yaml: {e}")))?;
        Ok(path)
    }

    async fn upgrade_install(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<(), DriverError> {
        let workdir = self.workspace_dir(id);
        let values_path = self.write_values_file(&workdir, manifest).await?;
        let release = self.release_name(id);

        let values_arg = values_path.display().to_string();
        let (code, output) = run(
            &self.binary,
            &[
                "upgrade",
                "--install",
                &release,
                &manifest.workload_ref,
                "--namespace",
                &self.namespace,
                "--create-namespace",
                "-f",
                &values_arg,
                "--wait",
                "--timeout",
                "5m",
            ],
            &workdir,
            &[],
        )
        .await?;

        if code != 0 {
            return Err(DriverError::DeployFailed(format!("helm upgrade --install exited {code}: {output}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for HelmDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Helm
    }

    async fn deploy(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<(), DriverError> {
        debug!(deployment_id = %id, "helm: deploy");
        self.upgrade_install(id, manifest).await
    }

    async fn update(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<(), DriverError> {
        debug!(deployment_id = %id, "helm: update");
        self.upgrade_install(id, manifest).await
    }

    async fn remove(&self, id: &DeploymentId) -> Result<(), DriverError> {
        debug!(deployment_id = %id, "helm: remove");
        let workdir = self.workspace_dir(id);
        tokio::fs::create_dir_all(&workdir).await.ok();
        let release = self.release_name(id);

        let (code, output) = run(&self.binary, &["uninstall", &release, "--namespace", &self.namespace], &workdir, &[]).await?;

        // "release: not found" is success from our point of view: the end
        // state (nothing installed) already holds.
        if code != 0 && !output.contains("not found") {
            return Err(DriverError::RemoveFailed(format!("helm uninstall exited {code}: {output}")));
        }
        Ok(())
    }

    async fn exists(&self, id: &DeploymentId) -> Result<bool, DriverError> {
        let workdir = self.workspace_dir(id);
        tokio::fs::create_dir_all(&workdir).await.ok();
        let release = self.release_name(id);
        let (code, _) = run(&self.binary, &["status", &release, "--namespace", &self.namespace], &workdir, &[]).await?;
        Ok(code == 0)
    }

    async fn status(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<Vec<ComponentStatus>, DriverError> {
        let workdir = self.workspace_dir(id);
        tokio::fs::create_dir_all(&workdir).await.ok();
        let release = self.release_name(id);

        let (code, output) =
            run(&self.binary, &["status", &release, "--namespace", &self.namespace, "-o", "json"], &workdir, &[]).await?;

        if code != 0 {
            return Ok(manifest
                .components
                .iter()
                .map(|c| ComponentStatus {
                    component_name: c.name.clone(),
                    image_or_chart_ref: c.image_or_chart_ref.clone(),
                    phase: ActualPhase::Absent,
                    health: ComponentHealth::Unknown,
                    ports: vec![],
                })
                .collect());
        }

        let parsed: HelmStatus = serde_json::from_str(output.trim()).map_err(|e| DriverError::StatusFailed(format!("parse helm status: {e}")))?;
        let phase = helm_status_to_phase(&parsed.info.status);
        let health = if phase == ActualPhase::Running { ComponentHealth::Healthy } else { ComponentHealth::Unhealthy };

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

fn helm_status_to_phase(status: &str) -> ActualPhase {
    match status {
        "deployed" => ActualPhase::Running,
        "pending-install" => ActualPhase::Installing,
        "pending-upgrade" => ActualPhase::Updating,
        "uninstalling" => ActualPhase::Removing,
        "uninstalled" => ActualPhase::Removed,
        "failed" => ActualPhase::Failed,
        _ => ActualPhase::Degraded,
    }
}

#[derive(Debug, Deserialize)]
struct HelmStatus {
    info: HelmStatusInfo,
}

#[derive(Debug, Deserialize)]
struct HelmStatusInfo {
    status: String,
}

