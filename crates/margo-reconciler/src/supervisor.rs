//! Agent supervisor (spec.md §4.I): the one-shot startup sequence (load
//! config, onboard-or-resume, report capabilities) followed by starting the
//! poller, executor, monitor, and reporter under a shared cancellation
//! signal, with a bounded grace period for in-flight work at shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use margo_cache::ContentCache;
use margo_config::AgentConfig;
use margo_domain::DriverKind;
use margo_driver::{ComposeDriver, DriverRegistry, HelmDriver};
use margo_store::MemoryStore;
use margo_store::StateStore;
use margo_wfm::WfmClient;
use tracing::{info, warn};

use crate::backoff::BackoffPolicy;
use crate::cancel::CancellationSignal;
use crate::error::SupervisorError;
use crate::executor::{Executor, ExecutorDeps};
use crate::monitor::Monitor;
use crate::poller::Poller;
use crate::reporter::Reporter;

const SNAPSHOT_DEBOUNCE: Duration = Duration::from_secs(5);
const ONBOARD_BACKOFF: BackoffPolicy = BackoffPolicy::new(Duration::from_secs(1), 2.0, Duration::from_secs(30), 0.0);
const ONBOARD_MAX_ATTEMPTS: u32 = 10;
/// Default bound on how long `RunningAgent::shutdown` waits for in-flight
/// executor work before abandoning it.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Everything started after the one-shot startup sequence succeeds, handed
/// back to the caller (the CLI, or a test) so it can own the shutdown
/// trigger.
pub struct RunningAgent {
    pub store: Arc<dyn StateStore>,
    pub cancel: CancellationSignal,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl RunningAgent {
    /// Signal cancellation and wait (up to `grace`) for every task to stop,
    /// then flush a final store snapshot.
    pub async fn shutdown(self, grace: Duration) {
        self.cancel.cancel();
        let all = async {
            for h in self.handles {
                let _ = h.await;
            }
        };
        if tokio::time::timeout(grace, all).await.is_err() {
            warn!("shutdown grace period elapsed, some tasks may not have stopped cleanly");
        }
        if let Err(err) = self.store.flush().await {
            warn!(%err, "final snapshot flush failed");
        }
    }
}

/// Run the full one-shot startup sequence and start every long-running
/// component. Returns once everything is up; the caller decides when to
/// call `RunningAgent::shutdown`.
pub async fn start(config: AgentConfig) -> Result<RunningAgent, SupervisorError> {
    std::fs::create_dir_all(&config.data_dir).map_err(|e| SupervisorError::Io { path: config.data_dir.display().to_string(), source: e })?;

    let wfm = Arc::new(WfmClient::new(config.wfm_base_url.to_string())?);
    let client_id = load_or_onboard(&config.data_dir, &wfm).await?;

    report_capabilities_once(&wfm, &client_id, &config.capabilities_file).await?;

    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::load(margo_store::default_snapshot_path(&config.data_dir), SNAPSHOT_DEBOUNCE).await);
    let cache = Arc::new(ContentCache::new(config.data_dir.join("cache")));
    let drivers = Arc::new(build_driver_registry(&config));

    let (signal, token) = CancellationSignal::new();
    let mut handles = Vec::new();

    let poller = Poller::new(store.clone(), wfm.clone(), client_id.clone(), Duration::from_secs(config.poll_interval_secs));
    handles.push(tokio::spawn(poller.run(token.clone())));

    let executor = Arc::new(Executor::new(ExecutorDeps {
        store: store.clone(),
        cache,
        wfm: wfm.clone(),
        client_id: client_id.clone(),
        drivers: drivers.clone(),
    }));
    handles.push(tokio::spawn(executor.run(token.clone())));

    let monitor = Monitor::new(store.clone(), drivers, Duration::from_secs(config.monitor_interval_secs));
    handles.push(tokio::spawn(monitor.run(token.clone())));

    let reporter = Reporter::new(store.clone(), wfm, client_id);
    handles.push(tokio::spawn(reporter.run(token)));

    info!("agent started");
    Ok(RunningAgent { store, cancel: signal, handles })
}

fn build_driver_registry(config: &AgentConfig) -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    match config.driver.kind {
        DriverKind::Helm => {
            registry.register(DriverKind::Helm, Arc::new(HelmDriver::new(config.data_dir.join("helm"), "default")));
        }
        DriverKind::Compose => {
            registry.register(DriverKind::Compose, Arc::new(ComposeDriver::new(config.data_dir.join("compose"))));
        }
    }
    registry
}

fn client_id_path(data_dir: &Path) -> PathBuf {
    data_dir.join("client_id")
}

async fn load_or_onboard(data_dir: &Path, wfm: &WfmClient) -> Result<margo_domain::DeviceClientId, SupervisorError> {
    let path = client_id_path(data_dir);
    if let Ok(existing) = tokio::fs::read_to_string(&path).await {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            info!(client_id = trimmed, "resuming with existing client id");
            return Ok(margo_domain::DeviceClientId::new(trimmed));
        }
    }

    // TODO(margo): plug in the real device certificate once provisioning
    // lands; onboarding currently authenticates with a placeholder.
    let certificate = b"margo-agent-bootstrap-certificate";
    let mut attempt: u32 = 0;
    loop {
        match wfm.onboard(certificate).await {
            Ok(client_id) => {
                tokio::fs::write(&path, client_id.as_str()).await.map_err(|e| SupervisorError::Io { path: path.display().to_string(), source: e })?;
                info!(client_id = client_id.as_str(), "onboarded with WFM");
                return Ok(client_id);
            }
            Err(err) => {
                attempt += 1;
                if attempt >= ONBOARD_MAX_ATTEMPTS {
                    return Err(SupervisorError::Onboarding(err));
                }
                warn!(%err, attempt, "onboarding failed, retrying with backoff");
                tokio::time::sleep(ONBOARD_BACKOFF.delay_for_attempt(attempt - 1)).await;
            }
        }
    }
}

async fn report_capabilities_once(wfm: &WfmClient, client_id: &margo_domain::DeviceClientId, capabilities_file: &Path) -> Result<(), SupervisorError> {
    let content = tokio::fs::read_to_string(capabilities_file)
        .await
        .map_err(|e| SupervisorError::Io { path: capabilities_file.display().to_string(), source: e })?;
    let capabilities: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        SupervisorError::Io { path: capabilities_file.display().to_string(), source: std::io::Error::new(std::io::ErrorKind::InvalidData, e) }
    })?;

    let mut attempt: u32 = 0;
    loop {
        match wfm.report_capabilities(client_id, &capabilities).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                attempt += 1;
                if attempt >= ONBOARD_MAX_ATTEMPTS {
                    return Err(SupervisorError::Onboarding(err));
                }
                warn!(%err, attempt, "capability report failed, retrying with backoff");
                tokio::time::sleep(ONBOARD_BACKOFF.delay_for_attempt(attempt - 1)).await;
            }
        }
    }
}
