//! STRATA Storage
//!
//! Backends that materialize views, and the resumable build cache.
//! The engine only sees the [`Backend`] trait.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod cache;
pub mod local;
pub mod memory;

pub use backend::{Backend, StorageError, TableInfo, naming};
pub use cache::{CACHE_FORMAT_VERSION, CacheStore, DEFAULT_CACHE_PATH, next_cache};
pub use local::{LocalBackend, LocalBackendConfig, TableRecord};
pub use memory::{MemoryBackend, MemoryTable};
