//! Local session cache: storage capability plus the versioned per-session
//! document written through it.

pub mod backend;
pub mod store;

pub use backend::{FsKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use store::{CACHE_SCHEMA_VERSION, LocalCacheStore, SessionCacheEntry};
