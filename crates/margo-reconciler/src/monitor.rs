//! Runtime monitor (spec.md §4.G): periodically samples driver status for
//! every deployment whose `actual_phase` is one the spec considers "live",
//! independent of the executor's fetch/install/remove cycle. Catches drift
//! the executor wouldn't otherwise notice (a container crash loop, a pod
//! evicted out from under a Helm release).

use std::sync::Arc;
use std::time::Duration;

use margo_domain::{ActualPhase, DeploymentRecord};
use margo_driver::DriverRegistry;
use margo_store::StateStore;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::health::phase_from_components;
use crate::keys;

pub struct Monitor {
    store: Arc<dyn StateStore>,
    drivers: Arc<DriverRegistry>,
    interval: Duration,
}

impl Monitor {
    pub fn new(store: Arc<dyn StateStore>, drivers: Arc<DriverRegistry>, interval: Duration) -> Self {
        Self { store, drivers, interval }
    }

    pub async fn run(self, mut cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {}
            }
            if cancel.is_cancelled() {
                return;
            }
            self.tick().await;
        }
    }

    async fn tick(&self) {
        let records = match self.store.list(keys::record_prefix()).await {
            Ok(r) => r,
            Err(err) => {
                warn!(%err, "monitor failed to list deployment records");
                return;
            }
        };

        for (key, value) in records {
            let Some(record) = serde_json::from_value::<DeploymentRecord>(value).ok() else { continue };
            if !record.actual_phase.is_monitored() {
                continue;
            }
            // A deployment mid-executor-operation already has a fresher
            // sample incoming; sampling here too would just race it.
            if record.in_flight_op.is_some() {
                continue;
            }
            self.sample_one(&key, record).await;
        }
    }

    async fn sample_one(&self, key: &str, mut record: DeploymentRecord) {
        let Some(manifest) = record.desired_spec.clone() else { return };
        let driver = match self.drivers.for_kind(manifest.driver_kind) {
            Ok(d) => d,
            Err(err) => {
                debug!(%err, deployment_id = %record.deployment_id, "monitor skipping tick: no driver configured");
                return;
            }
        };

        match driver.status(&record.deployment_id, &manifest).await {
            Ok(components) => {
                let new_phase = phase_from_components(&components);
                if new_phase != record.actual_phase || components != record.actual_components {
                    record.actual_components = components;
                    record.actual_phase = new_phase;
                    if let Ok(value) = serde_json::to_value(&record) {
                        if let Err(err) = self.store.put(key, value).await {
                            warn!(%err, deployment_id = %record.deployment_id, "monitor failed to persist sampled status");
                        }
                    }
                }
            }
            Err(err) => {
                // Transient driver failures are expected noise between
                // ticks; the next tick tries again. Only the executor
                // marks a deployment FAILED.
                debug!(%err, deployment_id = %record.deployment_id, "monitor status sample failed, will retry next tick");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use margo_domain::{ComponentHealth, ComponentStatus};

    #[test]
    fn monitored_phases_match_spec_set() {
        assert!(ActualPhase::Running.is_monitored());
        assert!(ActualPhase::Degraded.is_monitored());
        assert!(ActualPhase::Installing.is_monitored());
        assert!(ActualPhase::Updating.is_monitored());
        assert!(!ActualPhase::Absent.is_monitored());
        assert!(!ActualPhase::Removed.is_monitored());
        assert!(!ActualPhase::Failed.is_monitored());
    }

    #[test]
    fn component_status_equality_detects_health_flip() {
        let a = ComponentStatus { component_name: "web".into(), image_or_chart_ref: "r".into(), phase: ActualPhase::Running, health: ComponentHealth::Healthy, ports: vec![] };
        let mut b = a.clone();
        b.health = ComponentHealth::Unhealthy;
        assert_ne!(a, b);
    }
}
