use std::net::SocketAddr;
use std::path::PathBuf;

use margo_domain::DriverKind;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub kind: DriverKind,
    pub kubeconfig: Option<PathBuf>,
    pub docker_socket: Option<PathBuf>,
}

/// The agent's fully validated runtime configuration, loaded once at
/// startup from a single YAML document.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub wfm_base_url: Url,
    pub poll_interval_secs: u64,
    pub monitor_interval_secs: u64,
    pub driver: DriverConfig,
    pub data_dir: PathBuf,
    pub capabilities_file: PathBuf,
    pub log_format: LogFormat,
    pub bind_addr: SocketAddr,
}
