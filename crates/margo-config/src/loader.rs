use std::path::Path;

use margo_domain::DriverKind;
use tracing::debug;
use url::Url;

use crate::config::{AgentConfig, DriverConfig, LogFormat};
use crate::error::ConfigError;
use crate::raw::RawAgentConfig;

/// Load and validate the agent's YAML configuration file.
///
/// Validates: `wfm_base_url` parses as a URL, `driver.kind` is a known
/// variant, `data_dir` can be created (or already exists as a directory),
/// `capabilities_file` exists and parses as JSON. Any failure here is
/// fatal — the caller should abort before starting any component.
pub fn load(path: &Path) -> Result<AgentConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let raw: RawAgentConfig = serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })?;

    debug!(path = %path.display(), "loaded agent config");
    convert(raw)
}

fn convert(raw: RawAgentConfig) -> Result<AgentConfig, ConfigError> {
    let wfm_base_url = Url::parse(&raw.wfm_base_url).map_err(|_| ConfigError::InvalidUrl(raw.wfm_base_url.clone()))?;

    let driver_kind = match raw.driver.kind.as_str() {
        "helm" => DriverKind::Helm,
        "compose" => DriverKind::Compose,
        other => return Err(ConfigError::UnknownDriverKind(other.to_string())),
    };

    std::fs::create_dir_all(&raw.data_dir).map_err(|e| ConfigError::DataDirUnusable {
        path: raw.data_dir.display().to_string(),
        message: e.to_string(),
    })?;

    validate_capabilities_file(&raw.capabilities_file)?;

    let log_format = match raw.log_format.as_str() {
        "text" => LogFormat::Text,
        "json" => LogFormat::Json,
        other => return Err(ConfigError::UnknownLogFormat(other.to_string())),
    };

    let bind_addr = raw.bind_addr.parse().map_err(|_| ConfigError::InvalidBindAddr(raw.bind_addr.clone()))?;

    Ok(AgentConfig {
        wfm_base_url,
        poll_interval_secs: raw.poll_interval_secs,
        monitor_interval_secs: raw.monitor_interval_secs,
        driver: DriverConfig {
            kind: driver_kind,
            kubeconfig: raw.driver.kubeconfig,
            docker_socket: raw.driver.docker_socket,
        },
        data_dir: raw.data_dir,
        capabilities_file: raw.capabilities_file,
        log_format,
        bind_addr,
    })
}

fn validate_capabilities_file(path: &std::path::Path) -> Result<(), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::CapabilitiesFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    serde_json::from_str::<serde_json::Value>(&content).map_err(|e| ConfigError::CapabilitiesFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(())
}
