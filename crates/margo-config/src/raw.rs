use serde::Deserialize;
use std::path::PathBuf;

fn default_poll_interval() -> u64 {
    20
}

fn default_monitor_interval() -> u64 {
    20
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:9090".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RawAgentConfig {
    pub wfm_base_url: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,
    pub driver: RawDriverConfig,
    pub data_dir: PathBuf,
    pub capabilities_file: PathBuf,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

#[derive(Debug, Deserialize)]
pub struct RawDriverConfig {
    pub kind: String,
    pub kubeconfig: Option<PathBuf>,
    pub docker_socket: Option<PathBuf>,
}
