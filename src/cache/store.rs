//! Durable record store with a single global TTL.
//!
//! The whole collection shares one `written_at` timestamp. Once it is older
//! than the TTL the collection is cleared as a unit; records never expire
//! one by one. Every mutation is written through to durable storage. Storage
//! failures are logged and otherwise ignored: the in-memory state stays
//! authoritative for the rest of the process.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::error::StoreError;
use super::storage::DurableStorage;
use super::traits::Cacheable;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreState<T> {
  records: BTreeMap<String, T>,
  /// Milliseconds since the Unix epoch
  written_at: i64,
}

impl<T> StoreState<T> {
  fn empty(now: i64) -> Self {
    Self {
      records: BTreeMap::new(),
      written_at: now,
    }
  }
}

/// Persistent store of lightweight records.
pub struct MetadataStore<T, S> {
  storage: S,
  storage_key: String,
  ttl: Duration,
  clock: Arc<dyn Clock>,
  state: Mutex<StoreState<T>>,
}

impl<T: Cacheable, S: DurableStorage> MetadataStore<T, S> {
  /// Load the store from `storage`, using the system clock.
  pub fn load(storage: S, storage_key: impl Into<String>, ttl: Duration) -> Self {
    Self::load_with_clock(storage, storage_key, ttl, Arc::new(SystemClock))
  }

  /// Load the store from `storage`.
  ///
  /// Missing, unreadable or malformed state is replaced by an empty
  /// collection stamped with the current time. Never fails.
  pub fn load_with_clock(
    storage: S,
    storage_key: impl Into<String>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let storage_key = storage_key.into();
    let now = clock.now_millis();

    let state = match read_state::<T>(&storage, &storage_key) {
      Ok(Some(state)) => {
        debug!(
          storage_key = %storage_key,
          entity = T::entity_type(),
          records = state.records.len(),
          "loaded persisted state"
        );
        state
      }
      Ok(None) => StoreState::empty(now),
      Err(e) => {
        warn!(storage_key = %storage_key, error = %e, "starting with empty state");
        StoreState::empty(now)
      }
    };

    Self {
      storage,
      storage_key,
      ttl,
      clock,
      state: Mutex::new(state),
    }
  }

  fn lock(&self) -> MutexGuard<'_, StoreState<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn is_fresh_at(&self, state: &StoreState<T>, now: i64) -> bool {
    now - state.written_at < self.ttl.num_milliseconds()
  }

  /// Clear the collection if its TTL has run out.
  fn expire(&self, state: &mut StoreState<T>) {
    let now = self.clock.now_millis();
    if !self.is_fresh_at(state, now) && !state.records.is_empty() {
      debug!(
        storage_key = %self.storage_key,
        records = state.records.len(),
        age_ms = now - state.written_at,
        "TTL expired, clearing records"
      );
      state.records.clear();
      self.persist(state);
    }
  }

  /// Write the full state through to durable storage. Best-effort.
  fn persist(&self, state: &StoreState<T>) {
    let result = serde_json::to_string(state)
      .map_err(|e| StoreError::Write(e.to_string()))
      .and_then(|json| {
        self
          .storage
          .write_key(&self.storage_key, &json)
          .map_err(|e| StoreError::Write(e.to_string()))
      });

    if let Err(e) = result {
      warn!(storage_key = %self.storage_key, error = %e, "keeping in-memory state only");
    }
  }

  /// All records, or nothing if the collection has expired.
  pub fn get_all(&self) -> Vec<T> {
    let mut state = self.lock();
    self.expire(&mut state);
    state.records.values().cloned().collect()
  }

  /// A single record, subject to the same expiry as `get_all`.
  pub fn get(&self, id: &str) -> Option<T> {
    let mut state = self.lock();
    self.expire(&mut state);
    state.records.get(id).cloned()
  }

  /// Insert or replace the record with the same id.
  ///
  /// A record older than the stored one is refused (returns false) so that
  /// `updated_at` never goes backwards for an id.
  pub fn upsert(&self, record: T) -> bool {
    let mut state = self.lock();
    self.expire(&mut state);

    let stored = insert_checked(&mut state.records, record);
    if stored {
      state.written_at = self.clock.now_millis();
      self.persist(&state);
    }
    stored
  }

  /// Insert or replace several records with a single write.
  /// Returns how many were stored.
  pub fn upsert_many(&self, records: impl IntoIterator<Item = T>) -> usize {
    let mut state = self.lock();
    self.expire(&mut state);

    let stored = records
      .into_iter()
      .map(|record| insert_checked(&mut state.records, record))
      .filter(|&stored| stored)
      .count();

    if stored > 0 {
      state.written_at = self.clock.now_millis();
      self.persist(&state);
    }
    stored
  }

  /// Replace the whole collection.
  pub fn replace_all(&self, records: impl IntoIterator<Item = T>) {
    let mut state = self.lock();
    state.records = records
      .into_iter()
      .map(|record| (record.cache_key(), record))
      .collect();
    state.written_at = self.clock.now_millis();
    self.persist(&state);
  }

  /// Delete the record with `id`.
  pub fn remove(&self, id: &str) -> Option<T> {
    let mut state = self.lock();
    let removed = state.records.remove(id);
    if removed.is_some() {
      self.persist(&state);
    }
    removed
  }

  /// Delete every record and the persisted value.
  pub fn clear(&self) {
    let mut state = self.lock();
    state.records.clear();
    if let Err(e) = self.storage.remove_key(&self.storage_key) {
      warn!(storage_key = %self.storage_key, error = %e, "failed to remove persisted state");
    }
  }

  /// Whether the collection is still within its TTL.
  pub fn is_fresh(&self) -> bool {
    let state = self.lock();
    self.is_fresh_at(&state, self.clock.now_millis())
  }

  /// Time since the collection was last written.
  pub fn age(&self) -> Duration {
    let state = self.lock();
    Duration::milliseconds(self.clock.now_millis() - state.written_at)
  }

  /// When the collection was last written.
  pub fn written_at(&self) -> DateTime<Utc> {
    let millis = self.lock().written_at;
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  /// Number of records held, without applying expiry.
  pub fn len(&self) -> usize {
    self.lock().records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

fn read_state<T: Cacheable>(
  storage: &impl DurableStorage,
  storage_key: &str,
) -> Result<Option<StoreState<T>>, StoreError> {
  let Some(raw) = storage
    .read_key(storage_key)
    .map_err(|e| StoreError::Read(e.to_string()))?
  else {
    return Ok(None);
  };

  let state: StoreState<T> = serde_json::from_str(&raw)?;
  Ok(Some(state))
}

fn insert_checked<T: Cacheable>(records: &mut BTreeMap<String, T>, record: T) -> bool {
  let id = record.cache_key();
  if let Some(existing) = records.get(&id) {
    if existing.updated_at() > record.updated_at() {
      warn!(
        id = %id,
        stored = %existing.updated_at(),
        incoming = %record.updated_at(),
        "refusing to overwrite a newer record"
      );
      return false;
    }
  }
  records.insert(id, record);
  true
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::clock::ManualClock;
  use crate::cache::storage::MemoryStorage;
  use crate::cache::testing::{BrokenStorage, Note};

  const T0: i64 = 1_700_000_000_000;
  const KEY: &str = "test-local-state";

  fn store_on<S: DurableStorage>(storage: S, clock: &Arc<ManualClock>) -> MetadataStore<Note, S> {
    MetadataStore::load_with_clock(storage, KEY, Duration::minutes(60), clock.clone())
  }

  #[test]
  fn test_load_without_state_starts_empty() {
    let clock = Arc::new(ManualClock::new(T0));
    let store = store_on(MemoryStorage::new(), &clock);

    assert!(store.get_all().is_empty());
    assert_eq!(store.written_at().timestamp_millis(), T0);
    assert!(store.is_fresh());
  }

  #[test]
  fn test_ttl_boundary() {
    let clock = Arc::new(ManualClock::new(T0));
    let store = store_on(MemoryStorage::new(), &clock);
    store.upsert(Note::new("post-1", "2024-01-01T00:00:00Z", "body"));

    let ttl = Duration::minutes(60).num_milliseconds();

    clock.set(T0 + ttl - 1);
    assert_eq!(store.get_all().len(), 1);
    assert!(store.is_fresh());

    clock.set(T0 + ttl + 1);
    assert!(!store.is_fresh());
    assert!(store.get_all().is_empty());
    assert!(store.get("post-1").is_none());
  }

  #[test]
  fn test_expiry_is_persisted() {
    let clock = Arc::new(ManualClock::new(T0));
    let storage = Arc::new(MemoryStorage::new());
    let store = store_on(storage.clone(), &clock);
    store.upsert(Note::new("post-1", "2024-01-01T00:00:00Z", "body"));

    clock.advance(Duration::hours(2).num_milliseconds());
    assert!(store.get_all().is_empty());

    // Even with the clock turned back, the cleared state is what was saved
    clock.set(T0);
    let reloaded = store_on(storage, &clock);
    assert!(reloaded.get_all().is_empty());
  }

  #[test]
  fn test_upsert_survives_restart() {
    let clock = Arc::new(ManualClock::new(T0));
    let storage = Arc::new(MemoryStorage::new());
    let record = Note::new("post-1", "2024-01-01T00:00:00Z", "old").with_image("a.png");

    store_on(storage.clone(), &clock).upsert(record.clone());

    clock.advance(1_000);
    let reloaded = store_on(storage, &clock);
    assert_eq!(reloaded.get_all(), vec![record]);
    assert_eq!(reloaded.written_at().timestamp_millis(), T0);
  }

  #[test]
  fn test_malformed_state_is_discarded() {
    let clock = Arc::new(ManualClock::new(T0));
    let storage = Arc::new(MemoryStorage::new());

    storage.write_key(KEY, "{not json").unwrap();
    assert!(store_on(storage.clone(), &clock).get_all().is_empty());

    storage.write_key(KEY, r#"{"records": 5, "written_at": 1}"#).unwrap();
    let store = store_on(storage, &clock);
    assert!(store.get_all().is_empty());
    assert_eq!(store.written_at().timestamp_millis(), T0);
  }

  #[test]
  fn test_write_failure_keeps_memory_authoritative() {
    let clock = Arc::new(ManualClock::new(T0));
    let storage = Arc::new(MemoryStorage::with_quota(10));
    let store = store_on(storage.clone(), &clock);

    assert!(store.upsert(Note::new("post-1", "2024-01-01T00:00:00Z", "body")));
    assert_eq!(store.get_all().len(), 1);

    // Nothing made it to storage
    assert!(store_on(storage, &clock).get_all().is_empty());
  }

  #[test]
  fn test_broken_storage_never_raises() {
    let clock = Arc::new(ManualClock::new(T0));
    let store = store_on(BrokenStorage, &clock);

    assert!(store.upsert(Note::new("a", "2024-01-01T00:00:00Z", "x")));
    assert!(store.remove("a").is_some());
    store.clear();
    assert!(store.get_all().is_empty());
  }

  #[test]
  fn test_upsert_refuses_older_record() {
    let clock = Arc::new(ManualClock::new(T0));
    let store = store_on(MemoryStorage::new(), &clock);

    assert!(store.upsert(Note::new("post-1", "2024-06-01T00:00:00Z", "new")));
    assert!(!store.upsert(Note::new("post-1", "2024-01-01T00:00:00Z", "old")));
    assert_eq!(store.get("post-1").unwrap().body.as_deref(), Some("new"));

    // Same timestamp is allowed (metadata refresh)
    assert!(store.upsert(Note::new("post-1", "2024-06-01T00:00:00Z", "again")));
  }

  #[test]
  fn test_upsert_bumps_written_at() {
    let clock = Arc::new(ManualClock::new(T0));
    let store = store_on(MemoryStorage::new(), &clock);

    clock.advance(5_000);
    store.upsert(Note::new("a", "2024-01-01T00:00:00Z", "x"));
    assert_eq!(store.written_at().timestamp_millis(), T0 + 5_000);
    assert_eq!(store.age(), Duration::zero());
  }

  #[test]
  fn test_upsert_after_expiry_does_not_revive_old_records() {
    let clock = Arc::new(ManualClock::new(T0));
    let store = store_on(MemoryStorage::new(), &clock);
    store.upsert(Note::new("old", "2024-01-01T00:00:00Z", "x"));

    clock.advance(Duration::hours(2).num_milliseconds());
    store.upsert(Note::new("new", "2024-01-01T00:00:00Z", "y"));

    let ids: Vec<_> = store.get_all().into_iter().map(|n| n.id).collect();
    assert_eq!(ids, vec!["new"]);
  }

  #[test]
  fn test_remove_and_clear_persist() {
    let clock = Arc::new(ManualClock::new(T0));
    let storage = Arc::new(MemoryStorage::new());
    let store = store_on(storage.clone(), &clock);
    store.upsert_many(vec![
      Note::new("a", "2024-01-01T00:00:00Z", "x"),
      Note::new("b", "2024-01-01T00:00:00Z", "y"),
    ]);

    assert!(store.remove("a").is_some());
    assert!(store.remove("a").is_none());
    assert_eq!(store_on(storage.clone(), &clock).len(), 1);

    store.clear();
    assert!(store_on(storage, &clock).is_empty());
  }

  #[test]
  fn test_replace_all_swaps_collection() {
    let clock = Arc::new(ManualClock::new(T0));
    let store = store_on(MemoryStorage::new(), &clock);
    store.upsert(Note::new("a", "2024-01-01T00:00:00Z", "x"));

    store.replace_all(vec![Note::new("b", "2024-01-01T00:00:00Z", "y")]);
    let ids: Vec<_> = store.get_all().into_iter().map(|n| n.id).collect();
    assert_eq!(ids, vec!["b"]);
  }
}
