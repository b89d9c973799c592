use serde::{Deserialize, Serialize};

use crate::status::DriverKind;

/// One workload component named in a deployment manifest (a Helm chart's
/// sub-service, or one `services:` entry in a Compose file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub image_or_chart_ref: String,
}

/// Where a parameter's `target` path is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterTarget {
    /// Driver-native value tree (e.g. Helm `values.yaml`).
    Values,
    /// Environment variable injection (`env.KEY`).
    Env,
}

/// A single desired-state parameter. `target` is a dotted path
/// (`env.KEY`, `values.replicaCount`); `components`, if non-empty, restricts
/// the parameter to those component names — if no component matches the
/// active one, the parameter is ignored (spec: parameter rendering rules).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub anchor: ParameterTarget,
    pub target: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub components: Vec<String>,
}

impl Parameter {
    /// Whether this parameter applies to `component_name` (empty
    /// `components` means "all components").
    pub fn applies_to(&self, component_name: &str) -> bool {
        self.components.is_empty() || self.components.iter().any(|c| c == component_name)
    }

    /// Split `target` on `.` into its path segments.
    pub fn target_path(&self) -> Vec<&str> {
        self.target.split('.').collect()
    }
}

/// The parsed, verified deployment manifest — present on a
/// [`crate::DeploymentRecord`] only after fetch + digest verification +
/// parsing all succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentManifest {
    pub driver_kind: DriverKind,
    /// `oci://...` chart ref for Helm, or the compose file body for Compose.
    pub workload_ref: String,
    pub components: Vec<Component>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl DeploymentManifest {
    /// The validity check the executor runs after parsing: non-empty
    /// component list (§3 invariant, §8 boundary behaviour 10).
    pub fn validate(&self) -> Result<(), ManifestValidationError> {
        if self.components.is_empty() {
            return Err(ManifestValidationError::NoComponents);
        }
        Ok(())
    }

    /// Expand dotted-path parameters for one component into a nested JSON
    /// object, following the rules in spec.md §4.F: `env.KEY` becomes
    /// `{"env": {"KEY": value}}`, and parameters whose `components` list
    /// doesn't include this component are skipped.
    pub fn render_parameters(&self, component_name: &str) -> serde_json::Value {
        let mut root = serde_json::Map::new();
        for param in &self.parameters {
            if !param.applies_to(component_name) {
                continue;
            }
            insert_dotted(&mut root, &param.target_path(), param.value.clone());
        }
        serde_json::Value::Object(root)
    }
}

fn insert_dotted(root: &mut serde_json::Map<String, serde_json::Value>, path: &[&str], value: serde_json::Value) {
    match path {
        [] => {}
        [last] => {
            root.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = root
                .entry((*head).to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if let serde_json::Value::Object(map) = entry {
                insert_dotted(map, rest, value);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestValidationError {
    #[error("manifest declares no components")]
    NoComponents,
}
