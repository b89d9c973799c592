//! Deployment executor (spec.md §4.F): one logical task per `deployment_id`,
//! driving it through fetch → verify → install/update → running, or
//! running → removing → removed, on every desired-state change observed in
//! the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use margo_cache::{CacheError, CacheKind, ContentCache};
use margo_domain::{
    ActualPhase, DeploymentId, DeploymentManifest, DeploymentRecord, DesiredAction, DesiredItem, DeviceClientId, ErrorKind, InFlightOp, OpKind,
};
use margo_driver::DriverRegistry;
use margo_store::StateStore;
use margo_wfm::WfmClient;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::cancel::CancellationToken;
use crate::health::{phase_from_components, synthesize_healthy};
use crate::keys;

const MAX_TRANSIENT_ATTEMPTS: u32 = 10;
const EXECUTOR_BACKOFF: BackoffPolicy = BackoffPolicy::new(Duration::from_secs(2), 2.0, Duration::from_secs(300), 0.20);

/// Shared, cloneable dependencies every per-deployment task needs.
pub struct ExecutorDeps {
    pub store: Arc<dyn StateStore>,
    pub cache: Arc<ContentCache>,
    pub wfm: Arc<WfmClient>,
    pub client_id: DeviceClientId,
    pub drivers: Arc<DriverRegistry>,
}

/// Owns the set of live per-deployment tasks and fans desired-state writes
/// out to them. One task per `deployment_id` (invariant 3): a task is
/// spawned the first time a `desired/<id>` key appears, and reaped once its
/// deployment reaches `REMOVED`.
pub struct Executor {
    deps: Arc<ExecutorDeps>,
    tasks: Mutex<HashMap<DeploymentId, TaskHandle>>,
}

struct TaskHandle {
    target: watch::Sender<DesiredItem>,
    join: JoinHandle<()>,
}

impl Executor {
    pub fn new(deps: ExecutorDeps) -> Self {
        Self { deps: Arc::new(deps), tasks: Mutex::new(HashMap::new()) }
    }

    pub async fn run(self: Arc<Self>, mut cancel: CancellationToken) {
        let mut sub = self.deps.store.subscribe(keys::desired_prefix());

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                item = sub.next() => item,
            };
            let Some((key, value)) = next else { break };
            if key == keys::DESIRED_SNAPSHOT {
                continue;
            }
            let Some(id) = keys::deployment_id_from_key(keys::desired_prefix(), &key) else { continue };
            let Some(value) = value else { continue };
            let Ok(item) = serde_json::from_value::<DesiredItem>(value) else { continue };

            self.dispatch(id, item, cancel.clone()).await;
        }
        self.shutdown_and_wait(Duration::from_secs(10)).await;
    }

    async fn dispatch(&self, id: DeploymentId, item: DesiredItem, cancel: CancellationToken) {
        let mut tasks = self.tasks.lock().await;
        if let Some(handle) = tasks.get(&id) {
            let _ = handle.target.send(item);
            return;
        }

        let (target_tx, target_rx) = watch::channel(item);
        let deps = self.deps.clone();
        let join = tokio::spawn(run_deployment(id, target_rx, deps, cancel));
        tasks.insert(id, TaskHandle { target: target_tx, join });
    }

    async fn shutdown_and_wait(&self, grace: Duration) {
        let joins: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain().map(|(_, h)| h.join).collect()
        };
        let all = async {
            for j in joins {
                let _ = j.await;
            }
        };
        if tokio::time::timeout(grace, all).await.is_err() {
            warn!("executor grace period elapsed, abandoning in-flight deployment tasks");
        }
    }
}

/// How a loop iteration inside a per-deployment task ended.
enum Outcome {
    /// Converged (or permanently failed) — the task should idle until the
    /// next desired-state change.
    Done,
    /// The target changed mid-operation; restart immediately against the
    /// new target.
    Superseded,
    /// Shutdown was requested.
    Cancelled,
}

/// What a transient-retry helper tells its caller to do next.
enum RetryControl {
    /// Backoff slept without being interrupted; try the operation again.
    Continue,
    /// Give up on this iteration with `Outcome` (attempts exhausted,
    /// cancelled, or superseded).
    Stop(Outcome),
}

async fn run_deployment(id: DeploymentId, mut target_rx: watch::Receiver<DesiredItem>, deps: Arc<ExecutorDeps>, mut cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let target = target_rx.borrow_and_update().clone();
        let mut record = load_record(&deps.store, &id).await.unwrap_or_else(|| DeploymentRecord::new_pending(id, target.version, target.spec_digest.clone()));

        let outcome = match target.action {
            DesiredAction::Remove => do_remove(&id, &mut record, &deps, &mut target_rx, &mut cancel).await,
            DesiredAction::Apply => do_apply(&id, &target, &mut record, &deps, &mut target_rx, &mut cancel).await,
        };
        persist(&deps.store, &record).await;

        match outcome {
            Outcome::Cancelled => return,
            Outcome::Superseded => continue,
            Outcome::Done => {
                if record.actual_phase == ActualPhase::Removed {
                    return;
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = target_rx.changed() => {}
                }
            }
        }
    }
}

async fn persist(store: &Arc<dyn StateStore>, record: &DeploymentRecord) {
    if let Ok(value) = serde_json::to_value(record) {
        if let Err(err) = store.put(&keys::record(&record.deployment_id), value).await {
            warn!(%err, deployment_id = %record.deployment_id, "failed to persist deployment record");
        }
    }
}

async fn load_record(store: &Arc<dyn StateStore>, id: &DeploymentId) -> Option<DeploymentRecord> {
    store.get(&keys::record(id)).await.ok().flatten().and_then(|v| serde_json::from_value(v).ok())
}

/// Shared transient-retry bookkeeping: increments `attempt`, marks `record`
/// FAILED once the attempt budget is exhausted, otherwise sleeps the backoff
/// curve while watching for cancellation or a superseding desired-state
/// write.
async fn retry_or_fail(
    record: &mut DeploymentRecord,
    kind: ErrorKind,
    message: String,
    attempt: &mut u32,
    target_rx: &mut watch::Receiver<DesiredItem>,
    cancel: &mut CancellationToken,
) -> RetryControl {
    *attempt += 1;
    if *attempt >= MAX_TRANSIENT_ATTEMPTS {
        record.mark_error(kind, message, Utc::now());
        return RetryControl::Stop(Outcome::Done);
    }
    warn!(attempt = *attempt, %kind, %message, "transient failure, retrying with backoff");
    let delay = EXECUTOR_BACKOFF.delay_for_attempt(*attempt - 1);
    tokio::select! {
        _ = cancel.cancelled() => RetryControl::Stop(Outcome::Cancelled),
        changed = target_rx.changed() => RetryControl::Stop(if changed.is_ok() { Outcome::Superseded } else { Outcome::Cancelled }),
        _ = tokio::time::sleep(delay) => RetryControl::Continue,
    }
}

// ---------------------------------------------------------------------------
// Apply path: fetch + verify, then install or update.
// ---------------------------------------------------------------------------

async fn do_apply(
    id: &DeploymentId,
    target: &DesiredItem,
    record: &mut DeploymentRecord,
    deps: &Arc<ExecutorDeps>,
    target_rx: &mut watch::Receiver<DesiredItem>,
    cancel: &mut CancellationToken,
) -> Outcome {
    let need_fetch = record.desired_spec.is_none() || record.desired_spec_digest.as_ref() != Some(&target.spec_digest);

    if need_fetch {
        match fetch_and_verify(id, target, record, deps, target_rx, cancel).await {
            FetchResult::Bytes(manifest) => {
                record.desired_spec = Some(manifest);
                record.desired_version = target.version;
                record.desired_spec_digest = Some(target.spec_digest.clone());
                record.clear_error();
            }
            FetchResult::Permanent(kind, msg) => {
                record.mark_error(kind, msg, Utc::now());
                return Outcome::Done;
            }
            FetchResult::Superseded => return Outcome::Superseded,
            FetchResult::Cancelled => return Outcome::Cancelled,
        }
    }

    let manifest = record.desired_spec.clone().expect("fetched or already present");
    if let Err(e) = manifest.validate() {
        record.mark_error(ErrorKind::ManifestInvalid, e.to_string(), Utc::now());
        return Outcome::Done;
    }

    install_or_update(id, &manifest, record, deps, target_rx, cancel).await
}

enum FetchResult {
    Bytes(DeploymentManifest),
    Permanent(ErrorKind, String),
    Superseded,
    Cancelled,
}

/// Dual retry policy for the fetch step (spec.md §7): transient transport
/// errors get exponential backoff up to the shared attempt budget;
/// digest/corruption failures get exactly one immediate retry with no
/// sleep; anything else fails permanently on the first occurrence.
async fn fetch_and_verify(
    id: &DeploymentId,
    target: &DesiredItem,
    record: &mut DeploymentRecord,
    deps: &Arc<ExecutorDeps>,
    target_rx: &mut watch::Receiver<DesiredItem>,
    cancel: &mut CancellationToken,
) -> FetchResult {
    let mut digest_retry_used = false;
    let mut transient_attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return FetchResult::Cancelled;
        }
        if target_rx.has_changed().unwrap_or(false) {
            return FetchResult::Superseded;
        }

        record.in_flight_op = Some(InFlightOp { kind: OpKind::Fetch, started_at: Utc::now(), attempt: transient_attempt + 1 });
        persist(&deps.store, record).await;

        match fetch_once(id, target, deps).await {
            Ok(bytes) => match parse_manifest(&bytes) {
                Ok(manifest) => {
                    record.in_flight_op = None;
                    return FetchResult::Bytes(manifest);
                }
                Err(msg) => return FetchResult::Permanent(ErrorKind::ManifestInvalid, msg),
            },
            Err((kind, msg)) if kind.is_transient() => {
                transient_attempt += 1;
                if transient_attempt >= MAX_TRANSIENT_ATTEMPTS {
                    return FetchResult::Permanent(kind, msg);
                }
                let delay = EXECUTOR_BACKOFF.delay_for_attempt(transient_attempt - 1);
                tokio::select! {
                    _ = cancel.cancelled() => return FetchResult::Cancelled,
                    changed = target_rx.changed() => { if changed.is_ok() { return FetchResult::Superseded; } }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err((kind, msg)) if matches!(kind, ErrorKind::DigestMismatch | ErrorKind::Corrupt) => {
                if digest_retry_used {
                    return FetchResult::Permanent(kind, msg);
                }
                digest_retry_used = true;
                debug!(deployment_id = %id, %kind, "retrying fetch once after digest/corruption failure");
            }
            Err((kind, msg)) => return FetchResult::Permanent(kind, msg),
        }
    }
}

fn parse_manifest(bytes: &[u8]) -> Result<DeploymentManifest, String> {
    serde_yaml::from_slice(bytes).map_err(|e| format!("manifest parse error: {e}"))
}

async fn fetch_once(id: &DeploymentId, target: &DesiredItem, deps: &Arc<ExecutorDeps>) -> Result<Vec<u8>, (ErrorKind, String)> {
    let key = id.to_string();

    match deps.cache.get(CacheKind::Manifest, &key, &target.spec_digest).await {
        Ok(bytes) => return Ok(bytes),
        Err(CacheError::NotFound(_)) => {}
        Err(err) => debug!(deployment_id = %id, %err, "cached manifest unreadable, fetching fresh"),
    }

    let bytes = deps
        .wfm
        .fetch_deployment_yaml(&deps.client_id, id, &target.spec_digest, None)
        .await
        .map_err(|e| (e.kind(), e.to_string()))?;

    if let Err(err) = deps.cache.store(CacheKind::Manifest, &key, &target.spec_digest, &bytes).await {
        return Err((err.kind(), err.to_string()));
    }
    Ok(bytes)
}

// ---------------------------------------------------------------------------
// Install / update
// ---------------------------------------------------------------------------

async fn install_or_update(
    id: &DeploymentId,
    manifest: &DeploymentManifest,
    record: &mut DeploymentRecord,
    deps: &Arc<ExecutorDeps>,
    target_rx: &mut watch::Receiver<DesiredItem>,
    cancel: &mut CancellationToken,
) -> Outcome {
    let driver = match deps.drivers.for_kind(manifest.driver_kind) {
        Ok(d) => d,
        Err(e) => {
            record.mark_error(ErrorKind::Driver, e.to_string(), Utc::now());
            return Outcome::Done;
        }
    };

    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        if target_rx.has_changed().unwrap_or(false) {
            return Outcome::Superseded;
        }

        let exists = match driver.exists(id).await {
            Ok(b) => b,
            Err(e) => match retry_or_fail(record, ErrorKind::Driver, e.to_string(), &mut attempt, target_rx, cancel).await {
                RetryControl::Continue => continue,
                RetryControl::Stop(outcome) => return outcome,
            },
        };

        let op_kind = if exists { OpKind::Update } else { OpKind::Install };
        record.actual_phase = if exists { ActualPhase::Updating } else { ActualPhase::Installing };
        record.in_flight_op = Some(InFlightOp { kind: op_kind, started_at: Utc::now(), attempt: attempt + 1 });
        persist(&deps.store, record).await;

        let result = if exists { driver.update(id, manifest).await } else { driver.deploy(id, manifest).await };

        match result {
            Ok(()) => {
                record.actual_components = match driver.status(id, manifest).await {
                    Ok(components) => components,
                    Err(_) => synthesize_healthy(manifest),
                };
                record.actual_phase = phase_from_components(&record.actual_components);
                record.in_flight_op = None;
                record.clear_error();
                info!(deployment_id = %id, phase = %record.actual_phase, "deployment converged");
                return Outcome::Done;
            }
            Err(e) => match retry_or_fail(record, ErrorKind::Driver, e.to_string(), &mut attempt, target_rx, cancel).await {
                RetryControl::Continue => continue,
                RetryControl::Stop(outcome) => return outcome,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Remove
// ---------------------------------------------------------------------------

async fn do_remove(
    id: &DeploymentId,
    record: &mut DeploymentRecord,
    deps: &Arc<ExecutorDeps>,
    target_rx: &mut watch::Receiver<DesiredItem>,
    cancel: &mut CancellationToken,
) -> Outcome {
    let Some(manifest) = record.desired_spec.clone() else {
        // Never successfully fetched a spec for this id — nothing for the
        // driver to have installed.
        record.actual_phase = ActualPhase::Removed;
        record.in_flight_op = None;
        return Outcome::Done;
    };

    let driver = match deps.drivers.for_kind(manifest.driver_kind) {
        Ok(d) => d,
        Err(e) => {
            record.mark_error(ErrorKind::Driver, e.to_string(), Utc::now());
            return Outcome::Done;
        }
    };

    record.actual_phase = ActualPhase::Removing;
    record.in_flight_op = Some(InFlightOp { kind: OpKind::Remove, started_at: Utc::now(), attempt: 1 });
    persist(&deps.store, record).await;

    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        if target_rx.has_changed().unwrap_or(false) {
            return Outcome::Superseded;
        }

        let removed = match driver.remove(id).await {
            Ok(()) => !driver.exists(id).await.unwrap_or(true),
            Err(_) => false,
        };

        if removed {
            record.actual_phase = ActualPhase::Removed;
            record.actual_components.clear();
            record.in_flight_op = None;
            record.clear_error();
            let key = id.to_string();
            let _ = deps.cache.clear(CacheKind::Manifest, &key).await;
            return Outcome::Done;
        }

        match retry_or_fail(record, ErrorKind::Driver, "remove did not converge".to_string(), &mut attempt, target_rx, cancel).await {
            RetryControl::Continue => continue,
            RetryControl::Stop(outcome) => return outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use margo_domain::{Component, Digest};

    fn manifest() -> DeploymentManifest {
        DeploymentManifest {
            driver_kind: margo_domain::DriverKind::Helm,
            workload_ref: "oci://example/foo:1.0".into(),
            components: vec![Component { name: "web".into(), image_or_chart_ref: "oci://example/foo:1.0".into() }],
            parameters: vec![],
        }
    }

    #[test]
    fn synthesize_healthy_matches_manifest_components() {
        let m = manifest();
        let components = synthesize_healthy(&m);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].component_name, "web");
    }

    #[test]
    fn new_pending_starts_absent_with_no_spec() {
        let id = DeploymentId::new(uuid::Uuid::new_v4());
        let record = DeploymentRecord::new_pending(id, 1, Digest::of(b"m1"));
        assert_eq!(record.actual_phase, ActualPhase::Absent);
        assert!(record.desired_spec.is_none());
    }
}
