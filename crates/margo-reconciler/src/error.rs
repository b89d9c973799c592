use thiserror::Error;

/// Aggregated error type for the one-shot startup sequence the supervisor
/// runs before handing off to the E–H tasks (spec.md §7: `FATAL_CONFIG`
/// aborts startup before any component begins).
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("config error: {0}")]
    Config(#[from] margo_config::ConfigError),

    #[error("store error: {0}")]
    Store(#[from] margo_store::StoreError),

    #[error("onboarding failed: {0}")]
    Onboarding(#[from] margo_wfm::WfmError),

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
