//! Fixtures shared by the cache tests.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

use super::storage::DurableStorage;
use super::traits::Cacheable;

/// Minimal record with metadata and an optional body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
  pub id: String,
  pub updated_at: DateTime<Utc>,
  pub image: Option<String>,
  pub body: Option<String>,
}

impl Note {
  pub fn new(id: &str, updated_at: &str, body: &str) -> Self {
    Self {
      id: id.to_string(),
      updated_at: ts(updated_at),
      image: None,
      body: Some(body.to_string()),
    }
  }

  pub fn metadata_only(id: &str, updated_at: &str) -> Self {
    Self {
      body: None,
      ..Self::new(id, updated_at, "")
    }
  }

  pub fn with_image(mut self, image: &str) -> Self {
    self.image = Some(image.to_string());
    self
  }
}

impl Cacheable for Note {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn updated_at(&self) -> DateTime<Utc> {
    self.updated_at
  }

  fn entity_type() -> &'static str {
    "note"
  }

  fn reuse_body(&mut self, cached: Self) {
    if cached.body.is_some() {
      self.body = cached.body;
    }
  }

  fn is_complete(&self) -> bool {
    self.body.is_some()
  }
}

pub fn ts(s: &str) -> DateTime<Utc> {
  DateTime::parse_from_rfc3339(s)
    .expect("valid test timestamp")
    .with_timezone(&Utc)
}

/// Storage whose every operation fails.
pub struct BrokenStorage;

impl DurableStorage for BrokenStorage {
  fn read_key(&self, _name: &str) -> Result<Option<String>> {
    Err(eyre!("storage disabled"))
  }

  fn write_key(&self, _name: &str, _value: &str) -> Result<()> {
    Err(eyre!("storage disabled"))
  }

  fn remove_key(&self, _name: &str) -> Result<()> {
    Err(eyre!("storage disabled"))
  }
}
