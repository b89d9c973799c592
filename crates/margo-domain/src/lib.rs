pub mod desired;
pub mod error;
pub mod ids;
pub mod manifest;
pub mod record;
pub mod status;

pub use desired::{DesiredAction, DesiredItem, DesiredStateSnapshot};
pub use error::DomainError;
pub use ids::{DeploymentId, Digest, DeviceClientId};
pub use manifest::{Component, DeploymentManifest, Parameter, ParameterTarget};
pub use record::{compute_manifest_digest, DeploymentRecord, InFlightOp, OpKind, RecordedError};
pub use status::{ActualPhase, ComponentHealth, ComponentStatus, DriverKind, ErrorKind};
