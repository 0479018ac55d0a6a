use thiserror::Error;

/// Why a remote fetch produced no value.
///
/// Cloneable so a single failed request can be handed to every caller that
/// was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
  #[error("Network error: {0}")]
  Network(String),

  #[error("Unauthorized - token may be expired")]
  Unauthorized,

  #[error("Access denied: {0}")]
  Forbidden(String),

  #[error("Resource not found: {0}")]
  NotFound(String),

  #[error("Conflict: {0}")]
  Conflict(String),

  #[error("Rate limited - please wait before retrying")]
  RateLimited,

  #[error("Server error: {0}")]
  Server(String),

  #[error("Invalid response: {0}")]
  InvalidResponse(String),

  #[error("Request was cancelled")]
  Cancelled,
}

/// Neither the network nor the local store could provide data.
#[derive(Error, Debug, Clone)]
#[error("No data available for {key}: {source}")]
pub struct Unavailable {
  pub key: String,
  #[source]
  pub source: FetchError,
}

/// Persistence problems. Logged by the store, never returned to callers.
#[derive(Error, Debug)]
pub enum StoreError {
  #[error("Failed to read persisted state: {0}")]
  Read(String),

  #[error("Discarding malformed persisted state: {0}")]
  Malformed(#[from] serde_json::Error),

  #[error("Failed to persist state: {0}")]
  Write(String),
}
