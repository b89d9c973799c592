use serde::{Deserialize, Serialize};

use crate::ids::{DeploymentId, Digest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredAction {
    Apply,
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesiredItem {
    pub deployment_id: DeploymentId,
    pub version: u64,
    pub spec_digest: Digest,
    pub action: DesiredAction,
}

/// The latest desired manifest list received from the WFM. `freshness_token`
/// round-trips on the next poll so the server can short-circuit to
/// "not modified" (spec.md §3, §4.E).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesiredStateSnapshot {
    pub freshness_token: String,
    pub issued_at: chrono::DateTime<chrono::Utc>,
    pub items: Vec<DesiredItem>,
}
