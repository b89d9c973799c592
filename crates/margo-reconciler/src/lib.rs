mod backoff;
mod cancel;
mod error;
mod executor;
mod health;
pub mod keys;
mod monitor;
mod poller;
mod reporter;
mod supervisor;

pub use cancel::{CancellationSignal, CancellationToken};
pub use error::SupervisorError;
pub use executor::{Executor, ExecutorDeps};
pub use monitor::Monitor;
pub use poller::Poller;
pub use reporter::Reporter;
pub use supervisor::{start, RunningAgent, DEFAULT_SHUTDOWN_GRACE};
