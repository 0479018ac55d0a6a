//! Staleness-aware resolution between stored and freshly fetched records.
//!
//! The newer `updated_at` wins. On a tie the fetched metadata is kept but the
//! stored body is reused, so a metadata-only refresh never throws away a body
//! that is still current.

use std::cmp::Ordering;
use tracing::{trace, warn};

use super::error::FetchError;
use super::traits::Cacheable;

/// Outcome of combining a stored record with a fetch attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
  /// The fetch succeeded; the record is merged with the stored copy if any.
  Fresh(T),
  /// The fetch failed and the stored copy is served instead.
  Offline(T),
  /// The fetch failed and nothing is stored.
  Unavailable(FetchError),
}

/// Merge two versions of the same record.
///
/// Both inputs must share `cache_key()`. `updated_at` values come from the
/// server, so the newer one is trusted whichever side holds it.
pub fn merge<T: Cacheable>(cached: T, mut fetched: T) -> T {
  match fetched.updated_at().cmp(&cached.updated_at()) {
    Ordering::Greater => fetched,
    Ordering::Equal => {
      trace!(id = %fetched.cache_key(), "unchanged upstream, reusing stored body");
      fetched.reuse_body(cached);
      fetched
    }
    Ordering::Less => {
      warn!(
        entity = T::entity_type(),
        id = %cached.cache_key(),
        stored = %cached.updated_at(),
        fetched = %fetched.updated_at(),
        "fetched record is older than the stored copy, keeping stored copy"
      );
      cached
    }
  }
}

/// Decide what to hand back given an optional stored record and a fetch result.
pub fn resolve<T: Cacheable>(cached: Option<T>, fetched: Result<T, FetchError>) -> Resolution<T> {
  match (cached, fetched) {
    (Some(cached), Ok(fetched)) => Resolution::Fresh(merge(cached, fetched)),
    (None, Ok(fetched)) => Resolution::Fresh(fetched),
    (Some(cached), Err(_)) => Resolution::Offline(cached),
    (None, Err(error)) => Resolution::Unavailable(error),
  }
}
