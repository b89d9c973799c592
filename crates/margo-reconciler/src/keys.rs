//! Store key namespacing. The store (`margo-store`) is a flat string-keyed
//! map; every component that reads or writes it goes through these helpers
//! so the `/`-segmented convention lives in one place.

use margo_domain::DeploymentId;

pub const DESIRED_SNAPSHOT: &str = "desired/snapshot";
pub const FRESHNESS_TOKEN: &str = "wfm/freshness_token";
const DESIRED_PREFIX: &str = "desired/";
const RECORD_PREFIX: &str = "record/";
const REPORTED_PREFIX: &str = "reported/";

pub fn desired_item(id: &DeploymentId) -> String {
    format!("{DESIRED_PREFIX}{id}")
}

pub fn record(id: &DeploymentId) -> String {
    format!("{RECORD_PREFIX}{id}")
}

/// Key owned solely by the reporter: holds the digest of the last status
/// payload successfully delivered to the WFM. Kept separate from
/// `record/<id>` so the reporter never read-modify-writes a record field
/// the executor or monitor may be concurrently updating.
pub fn reported(id: &DeploymentId) -> String {
    format!("{REPORTED_PREFIX}{id}")
}

pub fn desired_prefix() -> &'static str {
    DESIRED_PREFIX
}

pub fn record_prefix() -> &'static str {
    RECORD_PREFIX
}

/// Recover the `DeploymentId` encoded in a `desired/<id>` or `record/<id>`
/// key. Returns `None` for the non-deployment keys sharing the `desired/`
/// prefix (`desired/snapshot`).
pub fn deployment_id_from_key(prefix: &str, key: &str) -> Option<DeploymentId> {
    let suffix = key.strip_prefix(prefix)?;
    let uuid = uuid::Uuid::parse_str(suffix).ok()?;
    Some(DeploymentId::new(uuid))
}
