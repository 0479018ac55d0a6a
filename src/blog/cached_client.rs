//! Cached blog client that wraps BlogClient with transparent caching.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use tracing::{debug, info, warn};

use crate::cache::{
  CacheLayer, CacheResult, DurableStorage, FetchError, FetchPolicy, MetadataStore, QueryKey,
  Unavailable,
};
use crate::config::Config;

use super::cache::BlogQueryKey;
use super::client::BlogClient;
use super::types::{is_valid_slug, Post, PostDraft};

pub type PostCache = CacheLayer<Post, Box<dyn DurableStorage>>;

/// Snapshot of the local post store.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStatus {
  /// Posts held locally (within the TTL)
  pub records: usize,
  /// Posts whose body is stored too
  pub complete: usize,
  /// Last write, if anything is stored
  pub written_at: Option<DateTime<Utc>>,
  pub age: Duration,
  pub ttl: Duration,
  pub policy: FetchPolicy,
}

/// Blog client with transparent caching support.
///
/// This wraps the underlying BlogClient and provides the same read API,
/// but results are de-duplicated, merged with the local store and served
/// from it when the network is down.
#[derive(Clone)]
pub struct CachedBlogClient {
  inner: BlogClient,
  cache: PostCache,
}

impl CachedBlogClient {
  /// Create a new cached blog client.
  pub fn new(config: &Config) -> Result<Self> {
    let inner = BlogClient::new(config)?;
    let storage = config.cache.open_storage()?;
    let store = MetadataStore::load(storage, config.cache.storage_key.clone(), config.cache.ttl());
    let cache = CacheLayer::new(store).with_policy(config.cache.policy);

    Ok(Self::with_parts(inner, cache))
  }

  pub fn with_parts(inner: BlogClient, cache: PostCache) -> Self {
    Self { inner, cache }
  }

  /// List post metadata. Bodies already stored for unchanged posts are kept.
  pub async fn list_metadata(&self, reload: u64) -> Result<CacheResult<Vec<Post>>, Unavailable> {
    self
      .cache
      .fetch_list(&BlogQueryKey::PostsMetadata, reload, || {
        let inner = self.inner.clone();
        async move {
          let metadata = inner.list_metadata().await?;
          Ok(metadata.into_iter().map(Post::from).collect())
        }
      })
      .await
  }

  /// List every post with its body.
  pub async fn list_posts(&self, reload: u64) -> Result<CacheResult<Vec<Post>>, Unavailable> {
    self
      .cache
      .fetch_list(&BlogQueryKey::Posts, reload, || {
        let inner = self.inner.clone();
        async move { inner.list_posts().await }
      })
      .await
  }

  /// Get a single post with its body.
  ///
  /// A slug the backend could never have accepted is reported as not found
  /// without a request.
  pub async fn get_post(&self, slug: &str, reload: u64) -> Result<CacheResult<Post>, Unavailable> {
    let key = BlogQueryKey::post(slug);
    if !is_valid_slug(slug) {
      debug!(slug, "rejecting invalid slug");
      return Err(Unavailable {
        key: key.description(),
        source: FetchError::NotFound(format!("invalid slug '{}'", slug)),
      });
    }

    self
      .cache
      .fetch_one(&key, slug, reload, || {
        let inner = self.inner.clone();
        let slug = slug.to_string();
        async move { inner.get_post(&slug).await }
      })
      .await
  }

  /// Create the post, or update it if the slug is already taken, and store
  /// the server's copy.
  pub async fn publish(&self, draft: &PostDraft) -> Result<Post, FetchError> {
    let post = match self.inner.create_post(draft).await {
      Err(FetchError::Conflict(_)) => {
        debug!(slug = %draft.slug, "post exists, updating");
        self.inner.update_post(draft).await?
      }
      other => other?,
    };

    if !self.cache.record_local(&BlogQueryKey::post(&draft.slug), post.clone()) {
      warn!(slug = %draft.slug, "server returned an older copy than the stored one");
    }
    info!(slug = %draft.slug, updated_at = %post.metadata.updated_at, "published post");
    Ok(post)
  }

  /// Delete the post remotely, then locally. A post the server no longer
  /// knows is still dropped from the store.
  pub async fn delete_post(&self, slug: &str) -> Result<(), FetchError> {
    let result = self.inner.delete_post(slug).await;
    if matches!(result, Ok(()) | Err(FetchError::NotFound(_))) {
      self.cache.forget(&BlogQueryKey::post(slug), slug);
    }
    result
  }

  /// Posts currently held in the local store.
  pub fn cached_posts(&self) -> Vec<Post> {
    self.cache.cached()
  }

  pub fn status(&self) -> CacheStatus {
    let posts = self.cache.cached();
    let store = self.cache.store();
    CacheStatus {
      records: posts.len(),
      complete: posts.iter().filter(|p| p.content.is_some()).count(),
      written_at: (!posts.is_empty()).then(|| store.written_at()),
      age: store.age(),
      ttl: store.ttl(),
      policy: self.cache.policy(),
    }
  }

  /// Abort an in-flight fetch of `slug`.
  pub fn cancel(&self, slug: &str) -> bool {
    self.cache.cancel(&BlogQueryKey::post(slug))
  }

  pub fn clear_cache(&self) {
    self.cache.clear();
  }
}
