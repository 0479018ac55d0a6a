//! Durable key-value storage backends.
//!
//! The metadata store serializes its whole state into a single value and
//! writes it through one of these backends after every mutation. Backends
//! are synchronous and best-effort: callers log failures instead of retrying.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Largest value a backend accepts by default (5 MiB).
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Synchronous, size-limited key-value persistence.
pub trait DurableStorage: Send + Sync {
  /// Read the value stored under `name`, if any.
  fn read_key(&self, name: &str) -> Result<Option<String>>;

  /// Store `value` under `name`, replacing any previous value.
  fn write_key(&self, name: &str, value: &str) -> Result<()>;

  /// Delete the value stored under `name`. Missing keys are not an error.
  fn remove_key(&self, name: &str) -> Result<()>;
}

impl<S: DurableStorage + ?Sized> DurableStorage for Box<S> {
  fn read_key(&self, name: &str) -> Result<Option<String>> {
    (**self).read_key(name)
  }

  fn write_key(&self, name: &str, value: &str) -> Result<()> {
    (**self).write_key(name, value)
  }

  fn remove_key(&self, name: &str) -> Result<()> {
    (**self).remove_key(name)
  }
}

impl<S: DurableStorage + ?Sized> DurableStorage for Arc<S> {
  fn read_key(&self, name: &str) -> Result<Option<String>> {
    (**self).read_key(name)
  }

  fn write_key(&self, name: &str, value: &str) -> Result<()> {
    (**self).write_key(name, value)
  }

  fn remove_key(&self, name: &str) -> Result<()> {
    (**self).remove_key(name)
  }
}

fn check_quota(name: &str, value: &str, quota: usize) -> Result<()> {
  if value.len() > quota {
    return Err(eyre!(
      "Storage quota exceeded for '{}': {} bytes (limit {})",
      name,
      value.len(),
      quota
    ));
  }
  Ok(())
}

/// Storage implementation that doesn't persist anything.
/// Used when persistence is disabled - reads always miss.
pub struct NoopStorage;

impl DurableStorage for NoopStorage {
  fn read_key(&self, _name: &str) -> Result<Option<String>> {
    Ok(None) // Always miss
  }

  fn write_key(&self, _name: &str, _value: &str) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove_key(&self, _name: &str) -> Result<()> {
    Ok(())
  }
}

/// Process-local storage. Survives re-loading a store within one process,
/// which is enough to exercise restart behaviour in tests.
pub struct MemoryStorage {
  values: Mutex<HashMap<String, String>>,
  quota: usize,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::with_quota(DEFAULT_QUOTA_BYTES)
  }

  pub fn with_quota(quota: usize) -> Self {
    Self {
      values: Mutex::new(HashMap::new()),
      quota,
    }
  }
}

impl Default for MemoryStorage {
  fn default() -> Self {
    Self::new()
  }
}

impl DurableStorage for MemoryStorage {
  fn read_key(&self, name: &str) -> Result<Option<String>> {
    let values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(values.get(name).cloned())
  }

  fn write_key(&self, name: &str, value: &str) -> Result<()> {
    check_quota(name, value, self.quota)?;
    let mut values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    values.insert(name.to_string(), value.to_string());
    Ok(())
  }

  fn remove_key(&self, name: &str) -> Result<()> {
    let mut values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    values.remove(name);
    Ok(())
  }
}

/// One JSON file per key inside a cache directory.
pub struct FileStorage {
  dir: PathBuf,
  quota: usize,
}

impl FileStorage {
  /// Open file storage rooted at `dir`, creating the directory if needed.
  pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
    let dir = dir.into();
    std::fs::create_dir_all(&dir)
      .map_err(|e| eyre!("Failed to create cache directory {}: {}", dir.display(), e))?;
    Ok(Self {
      dir,
      quota: DEFAULT_QUOTA_BYTES,
    })
  }

  /// Get the default cache directory.
  pub fn default_dir() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".cache")))
      .ok_or_else(|| eyre!("Could not determine cache directory"))?;

    Ok(cache_dir.join("postcache"))
  }

  pub fn with_quota(mut self, quota: usize) -> Self {
    self.quota = quota;
    self
  }

  fn path_for(&self, name: &str) -> PathBuf {
    let file: String = name
      .chars()
      .map(|c| {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
          c
        } else {
          '_'
        }
      })
      .collect();
    self.dir.join(format!("{}.json", file))
  }
}

impl DurableStorage for FileStorage {
  fn read_key(&self, name: &str) -> Result<Option<String>> {
    let path = self.path_for(name);
    match std::fs::read_to_string(&path) {
      Ok(contents) => Ok(Some(contents)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(eyre!("Failed to read {}: {}", path.display(), e)),
    }
  }

  fn write_key(&self, name: &str, value: &str) -> Result<()> {
    check_quota(name, value, self.quota)?;
    let path = self.path_for(name);
    let tmp = path.with_extension("json.tmp");

    std::fs::write(&tmp, value).map_err(|e| eyre!("Failed to write {}: {}", tmp.display(), e))?;
    std::fs::rename(&tmp, &path)
      .map_err(|e| eyre!("Failed to replace {}: {}", path.display(), e))?;
    Ok(())
  }

  fn remove_key(&self, name: &str) -> Result<()> {
    let path = self.path_for(name);
    match std::fs::remove_file(&path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(eyre!("Failed to remove {}: {}", path.display(), e)),
    }
  }
}

/// SQLite-based storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  quota: usize,
}

impl SqliteStorage {
  /// Create a new SQLite storage at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Create a new SQLite storage at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Create a throwaway in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
      quota: DEFAULT_QUOTA_BYTES,
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  pub fn with_quota(mut self, quota: usize) -> Self {
    self.quota = quota;
    self
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("postcache").join("cache.db"))
  }

  /// Run database migrations for the state table.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STATE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the key-value state table.
const STATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS local_state (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl DurableStorage for SqliteStorage {
  fn read_key(&self, name: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT value FROM local_state WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read '{}': {}", name, e))
  }

  fn write_key(&self, name: &str, value: &str) -> Result<()> {
    check_quota(name, value, self.quota)?;
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO local_state (name, value, written_at)
         VALUES (?, ?, datetime('now'))",
        params![name, value],
      )
      .map_err(|e| eyre!("Failed to write '{}': {}", name, e))?;

    Ok(())
  }

  fn remove_key(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM local_state WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to remove '{}': {}", name, e))?;

    Ok(())
  }
}
