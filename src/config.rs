use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{
  DurableStorage, FetchPolicy, FileStorage, MemoryStorage, NoopStorage, SqliteStorage,
};

/// Environment variables checked for the API token, in order.
const TOKEN_VARS: [&str; 2] = ["POSTCACHE_API_TOKEN", "BLOG_API_TOKEN"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Backend base URL, e.g. https://api.example.com
  pub url: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
  /// SQLite database in the data directory
  #[default]
  Sqlite,
  /// One JSON file per storage key
  File,
  /// Process memory only
  Memory,
  /// No persistence at all
  None,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
  /// How long stored posts stay valid after the last write
  pub ttl_minutes: u32,
  pub backend: StorageBackend,
  pub policy: FetchPolicy,
  /// Name the post collection is stored under
  pub storage_key: String,
  /// Database file (sqlite) or directory (file); defaults to the data dir
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_minutes: 60,
      backend: StorageBackend::default(),
      policy: FetchPolicy::default(),
      storage_key: "blog_posts_metadata".to_string(),
      path: None,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::minutes(i64::from(self.ttl_minutes))
  }

  /// Open the configured storage backend.
  pub fn open_storage(&self) -> Result<Box<dyn DurableStorage>> {
    let storage: Box<dyn DurableStorage> = match self.backend {
      StorageBackend::Sqlite => match self.path {
        Some(ref path) => Box::new(SqliteStorage::open_at(path)?),
        None => Box::new(SqliteStorage::open()?),
      },
      StorageBackend::File => {
        let dir = match self.path {
          Some(ref path) => path.clone(),
          None => FileStorage::default_dir()?,
        };
        Box::new(FileStorage::open(dir)?)
      }
      StorageBackend::Memory => Box::new(MemoryStorage::new()),
      StorageBackend::None => Box::new(NoopStorage),
    };
    Ok(storage)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./postcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/postcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/postcache/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("postcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("postcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.api.url.trim().is_empty() {
      return Err(eyre!("api.url must not be empty"));
    }
    Ok(config)
  }

  /// Get the API token from environment variables.
  ///
  /// Checks POSTCACHE_API_TOKEN first, then BLOG_API_TOKEN as fallback.
  /// Read-only endpoints work without one.
  pub fn get_api_token() -> Option<String> {
    token_from(|name| std::env::var(name).ok())
  }
}

fn token_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
  TOKEN_VARS
    .into_iter()
    .filter_map(|name| lookup(name))
    .map(|token| token.trim().to_string())
    .find(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("api:\n  url: https://api.example.com\n").unwrap();

    assert_eq!(config.api.url, "https://api.example.com");
    assert_eq!(config.cache, CacheConfig::default());
    assert_eq!(config.cache.ttl(), Duration::minutes(60));
    assert_eq!(config.cache.backend, StorageBackend::Sqlite);
    assert_eq!(config.cache.policy, FetchPolicy::NetworkFirst);
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
api:
  url: http://localhost:8000
cache:
  ttl_minutes: 5
  backend: file
  policy: cache_first
  storage_key: drtech_blog
  path: /tmp/postcache
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.cache.ttl(), Duration::minutes(5));
    assert_eq!(config.cache.backend, StorageBackend::File);
    assert_eq!(config.cache.policy, FetchPolicy::CacheFirst);
    assert_eq!(config.cache.storage_key, "drtech_blog");
    assert_eq!(config.cache.path, Some(PathBuf::from("/tmp/postcache")));
  }

  #[test]
  fn test_rejects_bad_config() {
    assert!(Config::from_yaml("cache:\n  ttl_minutes: 5\n").is_err());
    assert!(Config::from_yaml("api:\n  url: ''\n").is_err());
    assert!(Config::from_yaml("api:\n  url: x\ncache:\n  backend: redis\n").is_err());
    assert!(Config::from_yaml("api:\n  url: x\ncache:\n  policy: sometimes\n").is_err());
  }

  #[test]
  fn test_load_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("postcache.yaml");
    std::fs::write(&path, "api:\n  url: https://blog.test\ncache:\n  backend: memory\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.api.url, "https://blog.test");
    assert_eq!(config.cache.backend, StorageBackend::Memory);
  }

  #[test]
  fn test_open_storage_backends() {
    let dir = tempfile::tempdir().unwrap();

    for (backend, path) in [
      (StorageBackend::Sqlite, Some(dir.path().join("cache.db"))),
      (StorageBackend::File, Some(dir.path().join("files"))),
      (StorageBackend::Memory, None),
    ] {
      let cache = CacheConfig {
        backend,
        path,
        ..CacheConfig::default()
      };
      let storage = cache.open_storage().unwrap();
      storage.write_key("k", "v").unwrap();
      assert_eq!(storage.read_key("k").unwrap().as_deref(), Some("v"), "{:?}", backend);
    }

    let none = CacheConfig {
      backend: StorageBackend::None,
      ..CacheConfig::default()
    };
    let storage = none.open_storage().unwrap();
    storage.write_key("k", "v").unwrap();
    assert_eq!(storage.read_key("k").unwrap(), None);
  }

  #[test]
  fn test_token_lookup_order() {
    let env: HashMap<&str, &str> = [("POSTCACHE_API_TOKEN", " "), ("BLOG_API_TOKEN", "fallback")]
      .into_iter()
      .collect();
    assert_eq!(
      token_from(|name| env.get(name).map(|v| v.to_string())),
      Some("fallback".to_string())
    );

    let env: HashMap<&str, &str> = [("POSTCACHE_API_TOKEN", "primary"), ("BLOG_API_TOKEN", "fallback")]
      .into_iter()
      .collect();
    assert_eq!(
      token_from(|name| env.get(name).map(|v| v.to_string())),
      Some("primary".to_string())
    );

    assert_eq!(token_from(|_| None), None);
  }
}
