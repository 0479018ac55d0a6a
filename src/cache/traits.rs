//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Trait for records that can be cached and merged.
///
/// Implementors provide a stable identity and the server-assigned modification
/// time the merge policy compares.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique identifier for this record (e.g., post slug)
  fn cache_key(&self) -> String;

  /// Last modification timestamp, as reported by the server.
  fn updated_at(&self) -> DateTime<Utc>;

  /// Record type name for log fields (e.g., "post")
  fn entity_type() -> &'static str;

  /// Take over the content body of an older copy of the same version.
  ///
  /// Called when the freshly fetched record has the same `updated_at` as the
  /// cached one. Records without a separate body keep the default no-op.
  fn reuse_body(&mut self, _cached: Self) {}

  /// Whether the record carries everything a reader needs (e.g. its body).
  fn is_complete(&self) -> bool {
    true
  }
}

/// Deterministic cache key derived from request parameters.
///
/// Every parameter that changes the result must feed into `cache_hash`,
/// otherwise different queries share a cache slot.
pub trait QueryKey {
  /// Stable, fixed-length key for the fetch cache.
  fn cache_hash(&self) -> String;

  /// Human readable form for logs.
  fn description(&self) -> String;

  /// Whether stored records must be complete to answer this query.
  fn needs_complete(&self) -> bool {
    false
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was persisted locally (if from the store)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from stored data that is still within its TTL.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// True when the network failed and the data may be outdated.
  pub fn is_degraded(&self) -> bool {
    self.source == CacheSource::Offline
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
      cached_at: self.cached_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network (possibly merged with stored content)
  Network,
  /// Stored data served without a network call because it is still fresh
  Cache,
  /// Offline mode - network unavailable, serving stored data
  Offline,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CacheSource::Network => f.write_str("network"),
      CacheSource::Cache => f.write_str("cache"),
      CacheSource::Offline => f.write_str("offline"),
    }
  }
}
