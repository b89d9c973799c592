use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use margo_domain::DeploymentRecord;
use margo_store::{MemoryStore, StateStore};
use tracing_subscriber::EnvFilter;

const SNAPSHOT_READ_DEBOUNCE: Duration = Duration::from_secs(3600);

fn init_logging(log_format: margo_config::LogFormat) {
    let filter = EnvFilter::from_default_env();
    match log_format {
        margo_config::LogFormat::Json => {
            tracing_subscriber::fmt().with_env_filter(filter).with_target(false).json().init();
        }
        margo_config::LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
        }
    }
}

pub async fn run(config_path: &Path) -> Result<()> {
    let config = margo_config::load(config_path).with_context(|| format!("loading config at {}", config_path.display()))?;
    init_logging(config.log_format);

    let bind_addr = config.bind_addr;
    let agent = margo_reconciler::start(config).await.context("agent startup failed")?;

    let app = margo_api::build_app(agent.store.clone());
    let listener = tokio::net::TcpListener::bind(bind_addr).await.with_context(|| format!("binding status API to {bind_addr}"))?;
    tracing::info!(%bind_addr, "status API listening");
    let serve = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::warn!(%err, "status API server exited");
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("shutdown requested");

    serve.abort();
    agent.shutdown(margo_reconciler::DEFAULT_SHUTDOWN_GRACE).await;
    Ok(())
}

pub async fn status(config_path: &Path) -> Result<()> {
    let config = margo_config::load(config_path).with_context(|| format!("loading config at {}", config_path.display()))?;

    let snapshot_path = margo_store::default_snapshot_path(&config.data_dir);
    let store = MemoryStore::load(snapshot_path, SNAPSHOT_READ_DEBOUNCE).await;

    let entries = store.list(margo_reconciler::keys::record_prefix()).await?;
    if entries.is_empty() {
        println!("no deployments recorded");
        return Ok(());
    }

    println!("{:<38} {:<10} {:<8} {}", "DEPLOYMENT ID", "PHASE", "VERSION", "ERROR");
    for (key, value) in entries {
        let Ok(record) = serde_json::from_value::<DeploymentRecord>(value) else {
            println!("{key}: <corrupt record>");
            continue;
        };
        let error = record.last_error.map(|e| e.message).unwrap_or_default();
        println!("{:<38} {:<10} {:<8} {}", record.deployment_id.to_string(), record.actual_phase.to_string(), record.desired_version, error);
    }
    Ok(())
}
