//! In-process request de-duplication.
//!
//! `FetchCache` maps a cache key to a shared future. The first caller for a
//! key starts the request; everyone else asking for the same key before (or
//! after) it resolves gets a clone of the same future, so identical requests
//! result in exactly one network call.
//!
//! Entries are replaced wholesale when the caller's reload counter advances,
//! removed by `invalidate`, and aborted by `cancel`. A request that fails is
//! evicted as soon as it resolves, so a transient error never sticks to a key.

use futures::future::{AbortHandle, Abortable, Aborted, BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, trace};

use super::error::FetchError;

/// A fetch that can be awaited by any number of callers.
pub type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, FetchError>>>;

struct Slot<V> {
  fetch: SharedFetch<V>,
  /// Reload counter value this slot was created under
  reload: u64,
  /// Distinguishes this slot from later replacements under the same key
  generation: u64,
  abort: AbortHandle,
}

struct Slots<V> {
  map: HashMap<String, Slot<V>>,
  next_generation: u64,
}

fn lock<V>(slots: &Mutex<Slots<V>>) -> MutexGuard<'_, Slots<V>> {
  // Map mutations never panic halfway, so a poisoned map is still consistent.
  slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Request de-duplicating cache keyed by query parameters.
pub struct FetchCache<V> {
  slots: Arc<Mutex<Slots<V>>>,
}

impl<V> FetchCache<V>
where
  V: Clone + Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self {
      slots: Arc::new(Mutex::new(Slots {
        map: HashMap::new(),
        next_generation: 0,
      })),
    }
  }

  /// Return the fetch for `key`, starting it with `producer` if none exists.
  ///
  /// `producer` is called at most once and only when the key has no slot.
  /// It runs while the slot map is locked, so it must only build the future
  /// and not call back into this cache.
  pub fn get<F, Fut>(&self, key: &str, producer: F) -> SharedFetch<V>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
  {
    self.get_with_reload(key, 0, producer)
  }

  /// Like `get`, but a `reload` value greater than the one the existing
  /// slot was created under discards that slot and starts a new fetch.
  pub fn get_with_reload<F, Fut>(&self, key: &str, reload: u64, producer: F) -> SharedFetch<V>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
  {
    let mut slots = lock(&self.slots);

    if let Some(slot) = slots.map.get(key) {
      if reload <= slot.reload {
        trace!(key, "joining existing fetch");
        return slot.fetch.clone();
      }
      debug!(key, from = slot.reload, to = reload, "reload requested, replacing fetch");
    }

    slots.next_generation += 1;
    let generation = slots.next_generation;
    let (abort, registration) = AbortHandle::new_pair();
    let request = Abortable::new(producer(), registration);

    // Weak so the stored future doesn't keep its own map alive
    let owner = Arc::downgrade(&self.slots);
    let owned_key = key.to_string();

    let fetch = async move {
      let result = match request.await {
        Ok(result) => result,
        Err(Aborted) => Err(FetchError::Cancelled),
      };
      if let Err(ref error) = result {
        evict_failed(&owner, &owned_key, generation, error);
      }
      result
    }
    .boxed()
    .shared();

    slots.map.insert(
      key.to_string(),
      Slot {
        fetch: fetch.clone(),
        reload,
        generation,
        abort,
      },
    );
    trace!(key, reload, "started fetch");

    fetch
  }

  /// Whether `reload` advances past the counter of the slot for `key`.
  ///
  /// Without a slot only a non-zero `reload` counts.
  pub fn reload_pending(&self, key: &str, reload: u64) -> bool {
    match lock(&self.slots).map.get(key) {
      Some(slot) => reload > slot.reload,
      None => reload > 0,
    }
  }

  /// Drop the slot for `key`. Returns true if there was one.
  ///
  /// Callers already awaiting the old fetch still receive its result.
  pub fn invalidate(&self, key: &str) -> bool {
    let removed = lock(&self.slots).map.remove(key).is_some();
    if removed {
      debug!(key, "invalidated fetch");
    }
    removed
  }

  /// Abort the fetch for `key` and drop its slot.
  ///
  /// Every caller awaiting it observes `FetchError::Cancelled`. A fetch that
  /// already completed keeps its result for callers holding a clone.
  pub fn cancel(&self, key: &str) -> bool {
    match lock(&self.slots).map.remove(key) {
      Some(slot) => {
        slot.abort.abort();
        debug!(key, "cancelled fetch");
        true
      }
      None => false,
    }
  }

  /// Drop every slot.
  pub fn clear(&self) {
    lock(&self.slots).map.clear();
  }

  pub fn len(&self) -> usize {
    lock(&self.slots).map.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<V> Default for FetchCache<V>
where
  V: Clone + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

/// Remove a failed fetch, unless the slot has been replaced since.
fn evict_failed<V>(owner: &Weak<Mutex<Slots<V>>>, key: &str, generation: u64, error: &FetchError) {
  let Some(slots) = owner.upgrade() else {
    return;
  };
  let mut slots = lock(&slots);
  let current = slots
    .map
    .get(key)
    .is_some_and(|slot| slot.generation == generation);
  if current {
    slots.map.remove(key);
    debug!(key, error = %error, "evicted failed fetch");
  }
}
