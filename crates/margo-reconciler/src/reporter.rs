//! Status reporter (spec.md §4.H): subscribes to every `record/<id>` write
//! and forwards the deployment's current phase/components/error to the WFM,
//! deduplicating on a hash of the last payload actually delivered so a
//! store write that doesn't change anything observable produces no network
//! traffic. The dedup hash lives in its own `reported/<id>` key rather than
//! on `DeploymentRecord`, so the reporter never writes back a record the
//! executor or monitor may have moved on since it was read.

use std::sync::Arc;
use std::time::Duration;

use margo_domain::{DeploymentId, DeploymentRecord, Digest, DeviceClientId};
use margo_store::StateStore;
use margo_wfm::WfmClient;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::cancel::CancellationToken;
use crate::keys;

const BACKOFF: BackoffPolicy = BackoffPolicy::new(Duration::from_secs(1), 2.0, Duration::from_secs(30), 0.0);
const MAX_ATTEMPTS: u32 = 10;

pub struct Reporter {
    store: Arc<dyn StateStore>,
    wfm: Arc<WfmClient>,
    client_id: DeviceClientId,
}

impl Reporter {
    pub fn new(store: Arc<dyn StateStore>, wfm: Arc<WfmClient>, client_id: DeviceClientId) -> Self {
        Self { store, wfm, client_id }
    }

    pub async fn run(self, mut cancel: CancellationToken) {
        let mut sub = self.store.subscribe(keys::record_prefix());

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return,
                item = sub.next() => item,
            };
            let Some((key, value)) = next else { return };
            let Some(id) = keys::deployment_id_from_key(keys::record_prefix(), &key) else { continue };
            let Some(value) = value else { continue };
            let Ok(record) = serde_json::from_value::<DeploymentRecord>(value) else { continue };

            self.report_if_changed(id, record, &mut cancel).await;
        }
    }

    async fn report_if_changed(&self, id: DeploymentId, record: DeploymentRecord, cancel: &mut CancellationToken) {
        let hash = payload_hash(&record);
        let last_reported = self.store.get(&keys::reported(&id)).await.ok().flatten().and_then(|v| v.as_str().map(str::to_string));
        if last_reported.as_deref() == Some(hash.as_str()) {
            return;
        }

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self
                .wfm
                .report_deployment_status(&self.client_id, &id, record.actual_phase, &record.actual_components, record.last_error.as_ref())
                .await
            {
                Ok(()) => {
                    // Own key, not `record/<id>`: the executor/monitor may have
                    // written a newer phase while the POST above was in flight,
                    // and clobbering that write here would strand the record
                    // (spec.md §4.H dedup must never overwrite executor-owned
                    // fields).
                    if let Err(err) = self.store.put(&keys::reported(&id), serde_json::Value::String(hash)).await {
                        warn!(%err, deployment_id = %id, "reporter failed to persist reported hash");
                    }
                    return;
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        warn!(%err, deployment_id = %id, attempt, "giving up on status report after repeated failures");
                        return;
                    }
                    debug!(%err, deployment_id = %id, attempt, "status report failed, backing off");
                    let delay = BACKOFF.delay_for_attempt(attempt - 1);
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// Digest of the fields the WFM actually receives, so an executor write
/// that only touches `in_flight_op` or cached manifest bytes doesn't
/// trigger a redundant report.
fn payload_hash(record: &DeploymentRecord) -> String {
    let payload = serde_json::json!({
        "phase": record.actual_phase,
        "components": record.actual_components,
        "error": record.last_error,
    });
    Digest::of(&serde_json::to_vec(&payload).unwrap_or_default()).to_string()
}
