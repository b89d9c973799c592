mod compose;
mod driver;
mod error;
mod helm;
mod local;
mod registry;
mod subprocess;

pub use compose::ComposeDriver;
pub use driver::Driver;
pub use error::DriverError;
pub use helm::HelmDriver;
pub use local::LocalDriver;
pub use registry::DriverRegistry;
