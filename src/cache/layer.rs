//! Cache layer that orchestrates caching logic with network fetching.

use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::{FetchError, Unavailable};
use super::fetch::FetchCache;
use super::merge::{merge, resolve, Resolution};
use super::storage::DurableStorage;
use super::store::MetadataStore;
use super::traits::{CacheResult, Cacheable, QueryKey};

/// When to consult the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPolicy {
  /// Always fetch (de-duplicated), falling back to the store on failure
  #[default]
  NetworkFirst,
  /// Serve fresh, complete stored records without a network call unless
  /// the caller asks for a reload
  CacheFirst,
}

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the application and the network client,
/// providing request de-duplication, merging with stored records and
/// offline fallback.
pub struct CacheLayer<T: Cacheable, S: DurableStorage> {
  store: Arc<MetadataStore<T, S>>,
  items: Arc<FetchCache<T>>,
  lists: Arc<FetchCache<Vec<T>>>,
  policy: FetchPolicy,
}

impl<T: Cacheable, S: DurableStorage> CacheLayer<T, S> {
  /// Create a new cache layer on top of a loaded store.
  pub fn new(store: MetadataStore<T, S>) -> Self {
    Self {
      store: Arc::new(store),
      items: Arc::new(FetchCache::new()),
      lists: Arc::new(FetchCache::new()),
      policy: FetchPolicy::default(),
    }
  }

  /// Set the fetch policy.
  pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn policy(&self) -> FetchPolicy {
    self.policy
  }

  /// Fetch a single record.
  ///
  /// 1. Cache-first only: a fresh, complete stored record is returned as is
  /// 2. Fetch through the de-duplicating cache (a higher `reload` refetches)
  /// 3. Merge with the stored record and persist the result
  /// 4. On network failure, return the stored record (offline mode)
  /// 5. With neither, report `Unavailable`
  pub async fn fetch_one<K, F, Fut>(
    &self,
    key: &K,
    id: &str,
    reload: u64,
    fetcher: F,
  ) -> Result<CacheResult<T>, Unavailable>
  where
    K: QueryKey,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    let hash = key.cache_hash();

    if self.policy == FetchPolicy::CacheFirst && !self.items.reload_pending(&hash, reload) {
      if let Some(stored) = self.store.get(id).filter(T::is_complete) {
        debug!(query = %key.description(), "serving stored record");
        return Ok(CacheResult::from_cache(stored, self.store.written_at()));
      }
    }

    let fetched = self.items.get_with_reload(&hash, reload, fetcher).await;
    if let Err(ref e) = fetched {
      warn!(query = %key.description(), error = %e, "fetch failed");
    }

    match resolve(self.store.get(id), fetched) {
      Resolution::Fresh(record) => {
        self.store.upsert(record.clone());
        Ok(CacheResult::from_network(record))
      }
      Resolution::Offline(record) => {
        debug!(query = %key.description(), "serving stored record offline");
        Ok(CacheResult::offline(record, self.store.written_at()))
      }
      Resolution::Unavailable(source) => Err(Unavailable {
        key: key.description(),
        source,
      }),
    }
  }

  /// Fetch the full collection of records.
  ///
  /// Each fetched record is merged with its stored counterpart, so bodies of
  /// unchanged records survive a metadata-only listing. The merged listing
  /// replaces the stored collection, dropping records the server no longer
  /// has. On network failure the stored collection is served if it is
  /// non-empty and within its TTL.
  pub async fn fetch_list<K, F, Fut>(
    &self,
    key: &K,
    reload: u64,
    fetcher: F,
  ) -> Result<CacheResult<Vec<T>>, Unavailable>
  where
    K: QueryKey,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>, FetchError>> + Send + 'static,
  {
    let hash = key.cache_hash();

    if self.policy == FetchPolicy::CacheFirst && !self.lists.reload_pending(&hash, reload) {
      let stored = self.store.get_all();
      let usable = !key.needs_complete() || stored.iter().all(T::is_complete);
      if !stored.is_empty() && usable {
        debug!(query = %key.description(), count = stored.len(), "serving stored records");
        return Ok(CacheResult::from_cache(stored, self.store.written_at()));
      }
    }

    match self.lists.get_with_reload(&hash, reload, fetcher).await {
      Ok(fetched) => {
        let mut stored: HashMap<String, T> = self
          .store
          .get_all()
          .into_iter()
          .map(|record| (record.cache_key(), record))
          .collect();

        let merged: Vec<T> = fetched
          .into_iter()
          .map(|record| match stored.remove(&record.cache_key()) {
            Some(cached) => merge(cached, record),
            None => record,
          })
          .collect();

        self.store.replace_all(merged.clone());
        Ok(CacheResult::from_network(merged))
      }
      Err(source) => {
        warn!(query = %key.description(), error = %source, "fetch failed");
        let stored = self.store.get_all();
        if stored.is_empty() {
          return Err(Unavailable {
            key: key.description(),
            source,
          });
        }
        Ok(CacheResult::offline(stored, self.store.written_at()))
      }
    }
  }

  /// Persist a record produced locally (e.g. the server's answer to an edit)
  /// and drop in-process results it may have made stale.
  pub fn record_local<K: QueryKey>(&self, key: &K, record: T) -> bool {
    let stored = self.store.upsert(record);
    self.items.invalidate(&key.cache_hash());
    self.lists.clear();
    stored
  }

  /// Remove a record everywhere.
  pub fn forget<K: QueryKey>(&self, key: &K, id: &str) -> Option<T> {
    self.items.invalidate(&key.cache_hash());
    self.lists.clear();
    self.store.remove(id)
  }

  /// Drop in-process results for `key` so the next call refetches.
  pub fn invalidate<K: QueryKey>(&self, key: &K) {
    let hash = key.cache_hash();
    self.items.invalidate(&hash);
    self.lists.invalidate(&hash);
  }

  /// Abort an in-flight fetch for `key`.
  pub fn cancel<K: QueryKey>(&self, key: &K) -> bool {
    let hash = key.cache_hash();
    let item = self.items.cancel(&hash);
    let list = self.lists.cancel(&hash);
    item || list
  }

  /// Stored records still within their TTL.
  pub fn cached(&self) -> Vec<T> {
    self.store.get_all()
  }

  /// Drop everything, in process and on disk.
  pub fn clear(&self) {
    self.items.clear();
    self.lists.clear();
    self.store.clear();
  }

  pub fn store(&self) -> &MetadataStore<T, S> {
    &self.store
  }
}

impl<T: Cacheable, S: DurableStorage> Clone for CacheLayer<T, S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      items: Arc::clone(&self.items),
      lists: Arc::clone(&self.lists),
      policy: self.policy,
    }
  }
}
