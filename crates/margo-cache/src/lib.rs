mod cache;
mod error;
mod fs;

pub use cache::{CacheKind, ContentCache};
pub use error::CacheError;
