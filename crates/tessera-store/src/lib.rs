//! Per-node storage: a line-oriented disk file fronted by an optional
//! in-memory cache with a configurable displacement policy.

mod cache;
mod error;
mod file;

pub use cache::{build_cache, Cache, CachePolicy};
pub use error::StoreError;
pub use file::FileStore;
