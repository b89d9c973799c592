mod config;
mod error;
mod loader;
mod raw;

pub use config::{AgentConfig, DriverConfig, LogFormat};
pub use error::ConfigError;
pub use loader::load;
