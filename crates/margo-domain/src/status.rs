use serde::{Deserialize, Serialize};

/// The two workload runtime variants the driver layer can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    Helm,
    Compose,
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverKind::Helm => write!(f, "helm.v3"),
            DriverKind::Compose => write!(f, "compose"),
        }
    }
}

/// Lifecycle phase of a deployment's actual state, observed through the
/// driver. Closed set per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActualPhase {
    #[default]
    Absent,
    Installing,
    Running,
    Updating,
    Degraded,
    Failed,
    Removing,
    Removed,
}

impl std::fmt::Display for ActualPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActualPhase::Absent => "absent",
            ActualPhase::Installing => "installing",
            ActualPhase::Running => "running",
            ActualPhase::Updating => "updating",
            ActualPhase::Degraded => "degraded",
            ActualPhase::Failed => "failed",
            ActualPhase::Removing => "removing",
            ActualPhase::Removed => "removed",
        };
        write!(f, "{s}")
    }
}

impl ActualPhase {
    /// Phases the runtime monitor actively samples (spec.md §4.G).
    pub fn is_monitored(&self) -> bool {
        matches!(
            self,
            ActualPhase::Running | ActualPhase::Degraded | ActualPhase::Installing | ActualPhase::Updating
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentHealth {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Observed status of one manifest component. The set of `component_name`s
/// present must exactly match the manifest's component list; components the
/// driver doesn't report are synthesised as `Absent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub component_name: String,
    pub image_or_chart_ref: String,
    pub phase: ActualPhase,
    pub health: ComponentHealth,
    #[serde(default)]
    pub ports: Vec<u16>,
}

/// The closed error-kind set of spec.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    DigestMismatch,
    ManifestInvalid,
    Driver,
    NotFound,
    Corrupt,
    Cancelled,
    FatalConfig,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::DigestMismatch => "digest_mismatch",
            ErrorKind::ManifestInvalid => "manifest_invalid",
            ErrorKind::Driver => "driver",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Corrupt => "corrupt",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::FatalConfig => "fatal_config",
        };
        write!(f, "{s}")
    }
}

impl ErrorKind {
    /// Transient kinds are retried locally with backoff (spec.md §7);
    /// everything else is permanent per desired version.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Transport | ErrorKind::Driver)
    }
}
