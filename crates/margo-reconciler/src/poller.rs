//! Desired-state poller (spec.md §4.E). Periodically asks the WFM for the
//! current desired-state manifest, diffs it against what the store already
//! knows, and writes per-deployment `desired/<id>` records for anything
//! that changed. Never deletes a record: an id the WFM stops mentioning is
//! translated into an implicit `REMOVE` action, left for the executor to
//! carry out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use margo_domain::{DesiredAction, DesiredItem, DesiredStateSnapshot, DeviceClientId};
use margo_store::StateStore;
use margo_wfm::{DesiredStatePoll, WfmClient};
use tracing::{debug, info, warn};

use crate::backoff::{jittered, BackoffPolicy};
use crate::cancel::CancellationToken;
use crate::keys;

const BACKOFF: BackoffPolicy = BackoffPolicy::new(Duration::from_secs(1), 2.0, Duration::from_secs(60), 0.0);
const POLL_JITTER_FRACTION: f64 = 0.10;

pub struct Poller {
    store: Arc<dyn StateStore>,
    wfm: Arc<WfmClient>,
    client_id: DeviceClientId,
    poll_interval: Duration,
}

impl Poller {
    pub fn new(store: Arc<dyn StateStore>, wfm: Arc<WfmClient>, client_id: DeviceClientId, poll_interval: Duration) -> Self {
        Self { store, wfm, client_id, poll_interval }
    }

    pub async fn run(self, mut cancel: CancellationToken) {
        let mut token = self.load_token().await;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            let sleep_for = if attempt == 0 { jittered(self.poll_interval, POLL_JITTER_FRACTION) } else { BACKOFF.delay_for_attempt(attempt - 1) };
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(sleep_for) => {}
            }
            if cancel.is_cancelled() {
                return;
            }

            match self.wfm.get_desired_state(&self.client_id, token.as_deref()).await {
                Ok(DesiredStatePoll::NotModified) => {
                    debug!("desired state unchanged");
                    attempt = 0;
                }
                Ok(DesiredStatePoll::Fresh(snapshot, new_token)) => {
                    if let Err(err) = self.apply_snapshot(&snapshot).await {
                        warn!(%err, "failed to persist desired-state diff, will retry");
                        attempt += 1;
                        continue;
                    }
                    token = Some(new_token);
                    self.store.put(keys::FRESHNESS_TOKEN, serde_json::json!(token)).await.ok();
                    attempt = 0;
                }
                Err(err) => {
                    warn!(%err, attempt, "desired-state poll failed, backing off");
                    attempt += 1;
                }
            }
        }
    }

    async fn load_token(&self) -> Option<String> {
        self.store.get(keys::FRESHNESS_TOKEN).await.ok().flatten().and_then(|v| v.as_str().map(str::to_string))
    }

    async fn apply_snapshot(&self, snapshot: &DesiredStateSnapshot) -> Result<(), margo_store::StoreError> {
        let previous = self.previous_snapshot().await;
        let diff = diff_snapshot(&previous, snapshot, &self.known_live_ids().await);

        for item in &diff {
            self.store.put(&keys::desired_item(&item.deployment_id), serde_json::to_value(item)?).await?;
        }
        if !diff.is_empty() {
            info!(changed = diff.len(), "desired-state diff applied");
        }

        self.store.put(keys::DESIRED_SNAPSHOT, serde_json::to_value(snapshot)?).await?;
        Ok(())
    }

    async fn previous_snapshot(&self) -> Option<DesiredStateSnapshot> {
        self.store.get(keys::DESIRED_SNAPSHOT).await.ok().flatten().and_then(|v| serde_json::from_value(v).ok())
    }

    /// Deployment ids the store already has a record for, whose actual
    /// phase isn't terminal — used for the implicit-REMOVE tie-break.
    async fn known_live_ids(&self) -> HashMap<margo_domain::DeploymentId, margo_domain::ActualPhase> {
        let mut out = HashMap::new();
        if let Ok(records) = self.store.list(keys::record_prefix()).await {
            for (key, value) in records {
                let Some(id) = keys::deployment_id_from_key(keys::record_prefix(), &key) else { continue };
                let Ok(record) = serde_json::from_value::<margo_domain::DeploymentRecord>(value) else { continue };
                out.insert(id, record.actual_phase);
            }
        }
        out
    }
}

/// Compute the set of `DesiredItem`s that differ from `previous` (by
/// version or spec digest), plus an implicit `REMOVE` for every live id the
/// new snapshot omits entirely. The poller never deletes records itself —
/// it only ever writes new desired-action markers (spec.md §4.E).
fn diff_snapshot(
    previous: &Option<DesiredStateSnapshot>,
    fresh: &DesiredStateSnapshot,
    live_ids: &HashMap<margo_domain::DeploymentId, margo_domain::ActualPhase>,
) -> Vec<DesiredItem> {
    use margo_domain::ActualPhase;

    let prev_by_id: HashMap<_, _> = previous.iter().flat_map(|s| s.items.iter()).map(|i| (i.deployment_id, i)).collect();
    let mut out = Vec::new();

    for item in &fresh.items {
        let changed = match prev_by_id.get(&item.deployment_id) {
            None => true,
            // Conservative reading of the spec's open question: any digest
            // change is treated as a new version even if `version` itself
            // didn't move.
            Some(prev) => prev.version != item.version || prev.spec_digest != item.spec_digest || prev.action != item.action,
        };
        if changed {
            out.push(item.clone());
        }
    }

    let mentioned: std::collections::HashSet<_> = fresh.items.iter().map(|i| i.deployment_id).collect();
    for (id, phase) in live_ids {
        if mentioned.contains(id) || matches!(phase, ActualPhase::Removed | ActualPhase::Absent) {
            continue;
        }
        let version = prev_by_id.get(id).map(|i| i.version).unwrap_or(0);
        let digest = prev_by_id.get(id).map(|i| i.spec_digest.clone());
        if let Some(digest) = digest {
            out.push(DesiredItem { deployment_id: *id, version, spec_digest: digest, action: DesiredAction::Remove });
        }
    }

    out
}
