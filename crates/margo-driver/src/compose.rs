use std::path::PathBuf;

use async_trait::async_trait;
use margo_domain::{ActualPhase, ComponentHealth, ComponentStatus, DeploymentId, DeploymentManifest, DriverKind};
use serde::Deserialize;
use tracing::debug;

use crate::driver::Driver;
use crate::error::DriverError;
use crate::subprocess::run;

/// Drives workloads with `docker compose`. The manifest's `workload_ref` is
/// the compose file body itself (not a path), written out to the
/// deployment's workspace before every invocation.
pub struct ComposeDriver {
    workspace_root: PathBuf,
    binary: String,
}

impl ComposeDriver {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            binary: "docker".to_string(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn project_name(&self, id: &DeploymentId) -> String {
        format!("margo-{}", id.0.as_simple())
    }

    fn workspace_dir(&self, id: &DeploymentId) -> PathBuf {
        self.workspace_root.join(id.0.as_simple().to_string())
    }

    /// Env-anchored parameters, applicable across all components, flattened
    /// into `KEY=value` lines for a compose `.env` file. Later components
    /// win on key collisions.
    fn render_env_file(&self, manifest: &DeploymentManifest) -> String {
        let mut lines = Vec::new();
        for component in &manifest.components {
            let rendered = manifest.render_parameters(&component.name);
            if let Some(env) = rendered.get("env").and_then(|v| v.as_object()) {
                for (key, value) in env {
                    let value = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    lines.push(format!("{key}={value}"));
                }
            }
        }
        lines.join("\n")
    }

    async fn write_workspace(&self, workdir: &PathBuf, manifest: &DeploymentManifest) -> Result<(), DriverError> {
        tokio::fs::create_dir_all(workdir).await.map_err(|e| DriverError::Internal(format!("create workspace dir: {e}")))?;

        tokio::fs::write(workdir.join("docker-compose.yml"), &manifest.workload_ref)
            .await
            .map_err(|e| DriverError::Internal(format!("write docker-compose.yml: {e}")))?;

        let env = self.render_env_file(manifest);
        tokio::fs::write(workdir.join(".env"), env).await.map_err(|e| DriverError::Internal(format!("write .env: {e}")))?;
        Ok(())
    }

    async fn up(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<(), DriverError> {
        let workdir = self.workspace_dir(id);
        self.write_workspace(&workdir, manifest).await?;
        let project = self.project_name(id);

        let (code, output) =
            run(&self.binary, &["compose", "-p", &project, "up", "-d", "--remove-orphans"], &workdir, &[]).await?;

        if code != 0 {
            return Err(DriverError::DeployFailed(format!("docker compose up exited {code}: {output}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for ComposeDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Compose
    }

    async fn deploy(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<(), DriverError> {
        debug!(deployment_id = %id, "compose: deploy");
        self.up(id, manifest).await
    }

    async fn update(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<(), DriverError> {
        debug!(deployment_id = %id, "compose: update");
        self.up(id, manifest).await
    }

    async fn remove(&self, id: &DeploymentId) -> Result<(), DriverError> {
        debug!(deployment_id = %id, "compose: remove");
        let workdir = self.workspace_dir(id);
        tokio::fs::create_dir_all(&workdir).await.ok();
        let project = self.project_name(id);

        let (code, output) = run(&self.binary, &["compose", "-p", &project, "down", "--remove-orphans"], &workdir, &[]).await?;

        if code != 0 {
            return Err(DriverError::RemoveFailed(format!("docker compose down exited {code}: {output}")));
        }
        Ok(())
    }

    async fn exists(&self, id: &DeploymentId) -> Result<bool, DriverError> {
        let workdir = self.workspace_dir(id);
        tokio::fs::create_dir_all(&workdir).await.ok();
        let project = self.project_name(id);

        let (code, output) = run(&self.binary, &["compose", "-p", &project, "ps", "-q"], &workdir, &[]).await?;
        Ok(code == 0 && !output.trim().is_empty())
    }

    async fn status(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<Vec<ComponentStatus>, DriverError> {
        let workdir = self.workspace_dir(id);
        tokio::fs::create_dir_all(&workdir).await.ok();
        let project = self.project_name(id);

        let (code, output) =
            run(&self.binary, &["compose", "-p", &project, "ps", "--format", "json"], &workdir, &[]).await?;

        let mut by_service = std::collections::HashMap::new();
        if code == 0 {
            for line in output.lines().filter(|l| !l.trim().is_empty()) {
                if let Ok(entry) = serde_json::from_str::<ComposePsEntry>(line) {
                    by_service.insert(entry.service.clone(), entry);
                }
            }
        }

        Ok(manifest
            .components
            .iter()
            .map(|c| match by_service.get(&c.name) {
                Some(entry) => ComponentStatus {
                    component_name: c.name.clone(),
                    image_or_chart_ref: c.image_or_chart_ref.clone(),
                    phase: compose_state_to_phase(&entry.state),
                    health: compose_health(entry),
                    ports: vec![],
                },
                None => ComponentStatus {
                    component_name: c.name.clone(),
                    image_or_chart_ref: c.image_or_chart_ref.clone(),
                    phase: ActualPhase::Absent,
                    health: ComponentHealth::Unknown,
                    ports: vec![],
                },
            })
            .collect())
    }
}

fn compose_state_to_phase(state: &str) -> ActualPhase {
    match state {
        "running" => ActualPhase::Running,
        "restarting" => ActualPhase::Degraded,
        "removing" => ActualPhase::Removing,
        "exited" | "dead" => ActualPhase::Failed,
        "created" => ActualPhase::Installing,
        _ => ActualPhase::Degraded,
    }
}

fn compose_health(entry: &ComposePsEntry) -> ComponentHealth {
    match entry.health.as_deref() {
        Some("healthy") => ComponentHealth::Healthy,
        Some("unhealthy") => ComponentHealth::Unhealthy,
        Some(_) => ComponentHealth::Unknown,
        None if entry.state == "running" => ComponentHealth::Healthy,
        None => ComponentHealth::Unhealthy,
    }
}

#[derive(Debug, Deserialize)]
struct ComposePsEntry {
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "State")]
    state: String,
    #[serde(rename = "Health", default)]
    health: Option<String>,
}
