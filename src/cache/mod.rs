//! Generic caching layer for data persistence and offline support.
//!
//! This module provides a backend-agnostic caching mechanism that:
//! - De-duplicates concurrent requests for the same query parameters
//! - Persists lightweight records locally with a single global TTL
//! - Merges stored and fetched records by `updated_at`, reusing stored bodies
//!   when nothing changed upstream
//! - Provides basic offline mode (serve stored records when network unavailable)

pub mod clock;
mod error;
pub mod fetch;
mod layer;
pub mod merge;
pub mod storage;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;
mod traits;

pub use error::{FetchError, StoreError, Unavailable};
pub use fetch::FetchCache;
pub use layer::{CacheLayer, FetchPolicy};
pub use merge::{merge, resolve, Resolution};
pub use storage::{DurableStorage, FileStorage, MemoryStorage, NoopStorage, SqliteStorage};
pub use store::MetadataStore;
pub use traits::{CacheResult, CacheSource, Cacheable, QueryKey};
