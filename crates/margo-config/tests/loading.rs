use std::path::Path;

use margo_config::{ConfigError, LogFormat};
use margo_domain::DriverKind;

fn fixtures_dir() -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn write_config(contents: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("margo-config-test-{}.yaml", uuid::Uuid::new_v4()));
    std::fs::write(&path, contents).unwrap();
    path
}

fn valid_yaml(data_dir: &Path) -> String {
    format!(
        "wfm_base_url: https://wfm.example.com\n\
         poll_interval_secs: 15\n\
         monitor_interval_secs: 15\n\
         driver:\n\
         \x20\x20kind: helm\n\
         \x20\x20kubeconfig: /etc/rancher/k3s/k3s.yaml\n\
         data_dir: {}\n\
         capabilities_file: {}\n\
         log_format: json\n\
         bind_addr: 127.0.0.1:9191\n",
        data_dir.display(),
        fixtures_dir().join("capabilities.json").display(),
    )
}

#[test]
fn load_valid_config() {
    let data_dir = std::env::temp_dir().join(format!("margo-config-data-{}", uuid::Uuid::new_v4()));
    let config_path = write_config(&valid_yaml(&data_dir));

    let config = margo_config::load(&config_path).expect("should load without error");
    assert_eq!(config.wfm_base_url.as_str(), "https://wfm.example.com/");
    assert_eq!(config.poll_interval_secs, 15);
    assert_eq!(config.driver.kind, DriverKind::Helm);
    assert_eq!(config.log_format, LogFormat::Json);
    assert_eq!(config.bind_addr.port(), 9191);
}

#[test]
fn defaults_apply_when_omitted() {
    let data_dir = std::env::temp_dir().join(format!("margo-config-data-{}", uuid::Uuid::new_v4()));
    let yaml = format!(
        "wfm_base_url: https://wfm.example.com\n\
         driver:\n\
         \x20\x20kind: compose\n\
         data_dir: {}\n\
         capabilities_file: {}\n",
        data_dir.display(),
        fixtures_dir().join("capabilities.json").display(),
    );
    let config_path = write_config(&yaml);

    let config = margo_config::load(&config_path).expect("should load without error");
    assert_eq!(config.poll_interval_secs, 20);
    assert_eq!(config.monitor_interval_secs, 20);
    assert_eq!(config.log_format, LogFormat::Text);
    assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9090");
}

#[test]
fn missing_file_is_io_error() {
    let err = margo_config::load(Path::new("/nonexistent/path/config.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn unknown_driver_kind_is_rejected() {
    let data_dir = std::env::temp_dir().join(format!("margo-config-data-{}", uuid::Uuid::new_v4()));
    let yaml = format!(
        "wfm_base_url: https://wfm.example.com\n\
         driver:\n\
         \x20\x20kind: nomad\n\
         data_dir: {}\n\
         capabilities_file: {}\n",
        data_dir.display(),
        fixtures_dir().join("capabilities.json").display(),
    );
    let config_path = write_config(&yaml);

    let err = margo_config::load(&config_path).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownDriverKind(k) if k == "nomad"));
}

#[test]
fn invalid_url_is_rejected() {
    let data_dir = std::env::temp_dir().join(format!("margo-config-data-{}", uuid::Uuid::new_v4()));
    let yaml = format!(
        "wfm_base_url: \"not a url\"\n\
         driver:\n\
         \x20\x20kind: helm\n\
         data_dir: {}\n\
         capabilities_file: {}\n",
        data_dir.display(),
        fixtures_dir().join("capabilities.json").display(),
    );
    let config_path = write_config(&yaml);

    let err = margo_config::load(&config_path).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidUrl(_)));
}

#[test]
fn missing_capabilities_file_is_rejected() {
    let data_dir = std::env::temp_dir().join(format!("margo-config-data-{}", uuid::Uuid::new_v4()));
    let yaml = format!(
        "wfm_base_url: https://wfm.example.com\n\
         driver:\n\
         \x20\x20kind: helm\n\
         data_dir: {}\n\
         capabilities_file: /nonexistent/capabilities.json\n",
        data_dir.display(),
    );
    let config_path = write_config(&yaml);

    let err = margo_config::load(&config_path).unwrap_err();
    assert!(matches!(err, ConfigError::CapabilitiesFile { .. }));
}
