use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("yaml parse error in {path}: {source}")]
    YamlParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("wfm_base_url is not a valid URL: {0}")]
    InvalidUrl(String),

    #[error("unknown driver.kind '{0}', expected 'helm' or 'compose'")]
    UnknownDriverKind(String),

    #[error("unknown log_format '{0}', expected 'text' or 'json'")]
    UnknownLogFormat(String),

    #[error("data_dir {path} is not usable: {message}")]
    DataDirUnusable { path: String, message: String },

    #[error("capabilities_file {path}: {message}")]
    CapabilitiesFile { path: String, message: String },

    #[error("bind_addr '{0}' is not a valid socket address")]
    InvalidBindAddr(String),
}
