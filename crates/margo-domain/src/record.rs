use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DeploymentId, Digest};
use crate::manifest::DeploymentManifest;
use crate::status::{ActualPhase, ComponentStatus, ErrorKind};

/// The kind of driver operation currently in flight for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Fetch,
    Install,
    Update,
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InFlightOp {
    pub kind: OpKind,
    pub started_at: DateTime<Utc>,
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedError {
    pub kind: ErrorKind,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// One per logical deployment the device has ever been asked to run.
/// Primary key: `deployment_id`. See spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployment_id: DeploymentId,
    pub desired_version: u64,
    pub desired_spec_digest: Option<Digest>,
    pub desired_spec: Option<DeploymentManifest>,

    #[serde(default)]
    pub actual_phase: ActualPhase,
    #[serde(default)]
    pub actual_components: Vec<ComponentStatus>,

    pub last_error: Option<RecordedError>,
    pub in_flight_op: Option<InFlightOp>,
}

impl DeploymentRecord {
    /// A record created when the poller first observes an `APPLY` for an
    /// unknown `deployment_id` (spec.md §3 Lifecycle).
    pub fn new_pending(deployment_id: DeploymentId, desired_version: u64, desired_spec_digest: Digest) -> Self {
        Self {
            deployment_id,
            desired_version,
            desired_spec_digest: Some(desired_spec_digest),
            desired_spec: None,
            actual_phase: ActualPhase::Absent,
            actual_components: Vec::new(),
            last_error: None,
            in_flight_op: None,
        }
    }

    pub fn mark_error(&mut self, kind: ErrorKind, message: impl Into<String>, now: DateTime<Utc>) {
        self.last_error = Some(RecordedError {
            kind,
            message: message.into(),
            occurred_at: now,
        });
        self.actual_phase = ActualPhase::Failed;
        self.in_flight_op = None;
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }
}

/// Serialize `value` to canonical JSON (object keys sorted) and return its
/// SHA-256 digest, as `sha256:<hex>`. Used to detect manifest drift without
/// diffing the full struct, and to satisfy invariant 1/2 of spec.md §3/§8.
pub fn compute_manifest_digest<T: Serialize>(value: &T) -> Digest {
    let v = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
    let canonical = sort_json_keys(v);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    Digest::of(&bytes)
}

fn sort_json_keys(v: serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, serde_json::Value> =
                map.into_iter().map(|(k, v)| (k, sort_json_keys(v))).collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(arr) => serde_json::Value::Array(arr.into_iter().map(sort_json_keys).collect()),
        other => other,
    }
}
