mod client;
mod error;

pub use client::{DesiredStatePoll, WfmClient};
pub use error::WfmError;
