// SQLite-backed key-value store for client-side state
// Stats snapshots, the active polygon and view mode survive restarts here

pub mod cache;

pub use cache::{CacheError, CacheManager, Result};
