mod error;
mod fs;
mod memory;
mod snapshot;
mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use snapshot::default_snapshot_path;
pub use store::StateStore;
