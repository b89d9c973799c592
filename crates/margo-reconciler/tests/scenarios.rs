//! End-to-end reconciliation scenarios driving a real `Executor` against a
//! `LocalDriver`, an in-memory store, and a `WfmClient` backed by `wiremock`.
//! No real `helm`/`docker` subprocess and no real Workload Fleet Manager are
//! involved; everything else is the genuine production code path.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use margo_cache::ContentCache;
use margo_domain::{
    ActualPhase, DeploymentId, DeploymentManifest, DeploymentRecord, DesiredAction, DesiredItem, DeviceClientId, Digest, DriverKind,
};
use margo_driver::{Driver, DriverError, DriverRegistry, LocalDriver};
use margo_reconciler::{keys, Executor, ExecutorDeps, Poller, Reporter};
use margo_store::{MemoryStore, StateStore};
use margo_wfm::WfmClient;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn manifest_yaml(chart_ref: &str) -> String {
    format!(
        "driver_kind: helm\nworkload_ref: \"{chart_ref}\"\ncomponents:\n  - name: web\n    image_or_chart_ref: \"{chart_ref}\"\n"
    )
}

fn test_deps(drivers: DriverRegistry, wfm_base_url: String) -> (ExecutorDeps, Arc<dyn StateStore>) {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new_in_memory());
    let cache_root = std::env::temp_dir().join(format!("margo-scenarios-{}", uuid::Uuid::new_v4()));
    let deps = ExecutorDeps {
        store: store.clone(),
        cache: Arc::new(ContentCache::new(cache_root)),
        wfm: Arc::new(WfmClient::new(wfm_base_url).unwrap()),
        client_id: DeviceClientId::new("dev-scenarios"),
        drivers: Arc::new(drivers),
    };
    (deps, store)
}

fn helm_registry(driver: Arc<dyn Driver>) -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    registry.register(DriverKind::Helm, driver);
    registry
}

async fn mount_manifest(server: &MockServer, body: String) {
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(200).set_body_string(body)).mount(server).await;
}

async fn put_apply(store: &Arc<dyn StateStore>, id: DeploymentId, version: u64, digest: Digest) {
    let item = DesiredItem { deployment_id: id, version, spec_digest: digest, action: DesiredAction::Apply };
    store.put(&keys::desired_item(&id), serde_json::to_value(&item).unwrap()).await.unwrap();
}

async fn put_remove(store: &Arc<dyn StateStore>, id: DeploymentId, version: u64, digest: Digest) {
    let item = DesiredItem { deployment_id: id, version, spec_digest: digest, action: DesiredAction::Remove };
    store.put(&keys::desired_item(&id), serde_json::to_value(&item).unwrap()).await.unwrap();
}

async fn wait_for_phase(store: &Arc<dyn StateStore>, id: DeploymentId, phase: ActualPhase, timeout: Duration) -> DeploymentRecord {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = store.get(&keys::record(&id)).await.unwrap() {
            let record: DeploymentRecord = serde_json::from_value(value).unwrap();
            if record.actual_phase == phase {
                return record;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("deployment {id} did not reach {phase:?} within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn spawn_executor(deps: ExecutorDeps) -> (Arc<Executor>, margo_reconciler::CancellationSignal) {
    let (signal, token) = margo_reconciler::CancellationSignal::new();
    let executor = Arc::new(Executor::new(deps));
    tokio::spawn(executor.clone().run(token));
    (executor, signal)
}

/// S1: a brand new deployment_id with an APPLY desired item is fetched,
/// verified, and installed, converging to RUNNING.
#[tokio::test]
async fn s1_first_deploy_converges_to_running() {
    let server = MockServer::start().await;
    let yaml = manifest_yaml("oci://example/web:1.0");
    mount_manifest(&server, yaml.clone()).await;

    let driver: Arc<dyn Driver> = Arc::new(LocalDriver::new(DriverKind::Helm));
    let (deps, store) = test_deps(helm_registry(driver.clone()), server.uri());

    let (_executor, signal) = spawn_executor(deps);
    let id = DeploymentId::new(uuid::Uuid::new_v4());
    put_apply(&store, id, 1, Digest::of(yaml.as_bytes())).await;

    let record = wait_for_phase(&store, id, ActualPhase::Running, Duration::from_secs(5)).await;
    assert!(driver.exists(&id).await.unwrap());
    assert_eq!(record.desired_version, 1);
    assert!(record.last_error.is_none());

    signal.cancel();
}

/// Re-sending the identical desired item at the store level is a no-op —
/// the deployment stays RUNNING at the same version, no error is recorded.
/// (This exercises the executor's own `need_fetch` idempotence, not the
/// spec.md §8 S2 scenario itself — see `s2_no_op_poll_has_zero_side_effects`
/// below for the literal "WFM returns 304 three times in a row" case.)
#[tokio::test]
async fn repeated_identical_apply_is_idempotent() {
    let server = MockServer::start().await;
    let yaml = manifest_yaml("oci://example/web:1.0");
    mount_manifest(&server, yaml.clone()).await;

    let driver: Arc<dyn Driver> = Arc::new(LocalDriver::new(DriverKind::Helm));
    let (deps, store) = test_deps(helm_registry(driver), server.uri());
    let (_executor, signal) = spawn_executor(deps);

    let id = DeploymentId::new(uuid::Uuid::new_v4());
    let digest = Digest::of(yaml.as_bytes());
    put_apply(&store, id, 1, digest.clone()).await;
    wait_for_phase(&store, id, ActualPhase::Running, Duration::from_secs(5)).await;

    put_apply(&store, id, 1, digest).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let record = wait_for_phase(&store, id, ActualPhase::Running, Duration::from_secs(5)).await;
    assert_eq!(record.desired_version, 1);
    assert!(record.last_error.is_none());

    signal.cancel();
}

/// Wraps a `LocalDriver`, counting every `deploy`/`update` call so a test can
/// assert "zero driver calls" across a window instead of only checking the
/// resulting phase.
struct CountingDriver {
    inner: LocalDriver,
    mutating_calls: AtomicU32,
}

impl CountingDriver {
    fn new(kind: DriverKind) -> Self {
        Self { inner: LocalDriver::new(kind), mutating_calls: AtomicU32::new(0) }
    }

    fn mutating_call_count(&self) -> u32 {
        self.mutating_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for CountingDriver {
    fn kind(&self) -> DriverKind {
        self.inner.kind()
    }

    async fn deploy(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<(), DriverError> {
        self.mutating_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.deploy(id, manifest).await
    }

    async fn update(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<(), DriverError> {
        self.mutating_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.update(id, manifest).await
    }

    async fn remove(&self, id: &DeploymentId) -> Result<(), DriverError> {
        self.mutating_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(id).await
    }

    async fn exists(&self, id: &DeploymentId) -> Result<bool, DriverError> {
        self.inner.exists(id).await
    }

    async fn status(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<Vec<margo_domain::ComponentStatus>, DriverError> {
        self.inner.status(id, manifest).await
    }
}

/// S2 (spec.md §8, literal): "After S1, WFM returns 304 three times in a
/// row. Expect: zero driver calls, zero status reports (hash unchanged),
/// zero cache writes." Drives the real `Poller` + `Executor` + `Reporter`
/// against a `wiremock` server that serves the desired-state snapshot once
/// and then 304s on every subsequent poll, and asserts no further manifest
/// fetch, driver call, or status report happens across several poll cycles.
#[tokio::test]
async fn s2_no_op_poll_has_zero_side_effects() {
    let server = MockServer::start().await;
    let client_id = "dev-scenarios";
    let deployments_path = format!("/clients/{client_id}/deployments");

    let yaml = manifest_yaml("oci://example/web:1.0");
    let digest = Digest::of(yaml.as_bytes());
    let id = DeploymentId::new(uuid::Uuid::new_v4());

    let snapshot = margo_domain::DesiredStateSnapshot {
        freshness_token: "tok1".to_string(),
        issued_at: chrono::Utc::now(),
        items: vec![DesiredItem { deployment_id: id, version: 1, spec_digest: digest.clone(), action: DesiredAction::Apply }],
    };

    // First poll: fresh snapshot, ETag "tok1".
    Mock::given(method("GET"))
        .and(path(deployments_path.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(&snapshot).insert_header("ETag", "tok1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // Every subsequent poll carries `If-None-Match: tok1` and gets 304.
    Mock::given(method("GET"))
        .and(path(deployments_path.clone()))
        .and(header("If-None-Match", "tok1"))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/clients/{client_id}/deployments/{id}/{digest}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(yaml.clone()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/clients/{client_id}/deployment/{id}/status")))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let driver = Arc::new(CountingDriver::new(DriverKind::Helm));
    let (deps, store) = test_deps(helm_registry(driver.clone()), server.uri());
    let wfm = deps.wfm.clone();
    let store_for_reporter = store.clone();
    let (_executor, signal) = spawn_executor(deps);

    let poll_interval = Duration::from_millis(30);
    let poller = Poller::new(store.clone(), wfm.clone(), DeviceClientId::new(client_id), poll_interval);
    let (poller_signal, poller_token) = margo_reconciler::CancellationSignal::new();
    tokio::spawn(poller.run(poller_token));

    let reporter = Reporter::new(store_for_reporter, wfm, DeviceClientId::new(client_id));
    let (reporter_signal, reporter_token) = margo_reconciler::CancellationSignal::new();
    tokio::spawn(reporter.run(reporter_token));

    wait_for_phase(&store, id, ActualPhase::Running, Duration::from_secs(5)).await;

    let manifest_requests_before = requests_to(&server, &format!("/clients/{client_id}/deployments/{id}/{digest}")).await;
    let status_requests_before = requests_to(&server, &format!("/clients/{client_id}/deployment/{id}/status")).await;
    let mutating_calls_before = driver.mutating_call_count();

    // Let several 304 poll cycles elapse.
    tokio::time::sleep(poll_interval * 8).await;

    assert_eq!(
        requests_to(&server, &format!("/clients/{client_id}/deployments/{id}/{digest}")).await,
        manifest_requests_before,
        "no-op poll must not re-fetch the manifest (implies no new cache write)"
    );
    assert_eq!(
        requests_to(&server, &format!("/clients/{client_id}/deployment/{id}/status")).await,
        status_requests_before,
        "no-op poll must not produce a redundant status report"
    );
    assert_eq!(driver.mutating_call_count(), mutating_calls_before, "no-op poll must not call the driver again");

    signal.cancel();
    poller_signal.cancel();
    reporter_signal.cancel();
}

async fn requests_to(server: &MockServer, path: &str) -> usize {
    server.received_requests().await.unwrap().iter().filter(|r| r.url.path() == path).count()
}

/// S3: a new version with a changed digest triggers a re-fetch and
/// re-installs the already-installed deployment at the new content.
#[tokio::test]
async fn s3_version_bump_refetches_and_converges() {
    let server = MockServer::start().await;
    let v1 = manifest_yaml("oci://example/web:1.0");
    let v2 = manifest_yaml("oci://example/web:2.0");
    let digest1 = Digest::of(v1.as_bytes());
    let digest2 = Digest::of(v2.as_bytes());

    let client_id = "dev-scenarios";
    let id = DeploymentId::new(uuid::Uuid::new_v4());
    Mock::given(method("GET"))
        .and(path(format!("/clients/{client_id}/deployments/{id}/{digest1}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(v1.clone()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/clients/{client_id}/deployments/{id}/{digest2}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(v2.clone()))
        .mount(&server)
        .await;

    let driver: Arc<dyn Driver> = Arc::new(LocalDriver::new(DriverKind::Helm));
    let (deps, store) = test_deps(helm_registry(driver.clone()), server.uri());
    let (_executor, signal) = spawn_executor(deps);

    put_apply(&store, id, 1, digest1).await;
    wait_for_phase(&store, id, ActualPhase::Running, Duration::from_secs(5)).await;

    put_apply(&store, id, 2, digest2).await;
    // Wait for the new version to land; the phase stays RUNNING throughout,
    // so poll on the version field directly instead of a phase transition.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let record = loop {
        let value = store.get(&keys::record(&id)).await.unwrap().expect("record exists");
        let record: DeploymentRecord = serde_json::from_value(value).unwrap();
        if record.desired_version == 2 && record.actual_phase == ActualPhase::Running {
            break record;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("deployment {id} did not converge on version 2 within 5s");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(record.desired_spec.unwrap().workload_ref, "oci://example/web:2.0");

    signal.cancel();
}

/// S4: removing a running deployment tears it down at the driver and clears
/// its cached manifest.
#[tokio::test]
async fn s4_remove_converges_to_removed() {
    let server = MockServer::start().await;
    let yaml = manifest_yaml("oci://example/web:1.0");
    mount_manifest(&server, yaml.clone()).await;

    let driver: Arc<dyn Driver> = Arc::new(LocalDriver::new(DriverKind::Helm));
    let (deps, store) = test_deps(helm_registry(driver.clone()), server.uri());
    let (_executor, signal) = spawn_executor(deps);

    let id = DeploymentId::new(uuid::Uuid::new_v4());
    let digest = Digest::of(yaml.as_bytes());
    put_apply(&store, id, 1, digest.clone()).await;
    wait_for_phase(&store, id, ActualPhase::Running, Duration::from_secs(5)).await;

    put_remove(&store, id, 1, digest).await;
    let record = wait_for_phase(&store, id, ActualPhase::Removed, Duration::from_secs(5)).await;
    assert!(record.actual_components.is_empty());
    assert!(!driver.exists(&id).await.unwrap());

    signal.cancel();
}

/// S5: the WFM serves bytes that don't hash to the advertised digest. The
/// dual retry policy allows exactly one immediate re-fetch before failing
/// the deployment permanently (spec.md §7).
#[tokio::test]
async fn s5_digest_mismatch_fails_after_one_retry() {
    let server = MockServer::start().await;
    // Body never matches the digest the desired item advertises.
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(200).set_body_string("not-the-real-manifest")).mount(&server).await;

    let driver: Arc<dyn Driver> = Arc::new(LocalDriver::new(DriverKind::Helm));
    let (deps, store) = test_deps(helm_registry(driver), server.uri());
    let (_executor, signal) = spawn_executor(deps);

    let id = DeploymentId::new(uuid::Uuid::new_v4());
    let expected_digest = Digest::of(b"manifest-bytes-that-were-never-served");
    put_apply(&store, id, 1, expected_digest).await;

    let record = wait_for_phase(&store, id, ActualPhase::Failed, Duration::from_secs(5)).await;
    assert_eq!(record.last_error.unwrap().kind, margo_domain::ErrorKind::DigestMismatch);

    signal.cancel();
}

/// A driver that fails `deploy`/`update` `fail_count` times before
/// delegating to a real `LocalDriver`, exercising the executor's
/// exponential-backoff retry of transient driver errors (spec.md §7).
struct FlakyDriver {
    inner: LocalDriver,
    deploy_calls: AtomicU32,
    fail_count: u32,
}

impl FlakyDriver {
    fn new(fail_count: u32) -> Self {
        Self { inner: LocalDriver::new(DriverKind::Helm), deploy_calls: AtomicU32::new(0), fail_count }
    }
}

#[async_trait]
impl Driver for FlakyDriver {
    fn kind(&self) -> DriverKind {
        self.inner.kind()
    }

    async fn deploy(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<(), DriverError> {
        let call = self.deploy_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_count {
            return Err(DriverError::DeployFailed("simulated transient failure".to_string()));
        }
        self.inner.deploy(id, manifest).await
    }

    async fn update(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<(), DriverError> {
        self.inner.update(id, manifest).await
    }

    async fn remove(&self, id: &DeploymentId) -> Result<(), DriverError> {
        self.inner.remove(id).await
    }

    async fn exists(&self, id: &DeploymentId) -> Result<bool, DriverError> {
        self.inner.exists(id).await
    }

    async fn status(&self, id: &DeploymentId, manifest: &DeploymentManifest) -> Result<Vec<margo_domain::ComponentStatus>, DriverError> {
        self.inner.status(id, manifest).await
    }
}

/// S6: a transient driver failure doesn't fail the deployment — the
/// executor retries with backoff and eventually converges.
#[tokio::test]
async fn s6_transient_driver_error_eventually_succeeds() {
    let server = MockServer::start().await;
    let yaml = manifest_yaml("oci://example/web:1.0");
    mount_manifest(&server, yaml.clone()).await;

    let driver: Arc<dyn Driver> = Arc::new(FlakyDriver::new(1));
    let (deps, store) = test_deps(helm_registry(driver.clone()), server.uri());
    let (_executor, signal) = spawn_executor(deps);

    let id = DeploymentId::new(uuid::Uuid::new_v4());
    put_apply(&store, id, 1, Digest::of(yaml.as_bytes())).await;

    let record = wait_for_phase(&store, id, ActualPhase::Running, Duration::from_secs(10)).await;
    assert!(record.last_error.is_none());
    assert!(driver.exists(&id).await.unwrap());

    signal.cancel();
}
