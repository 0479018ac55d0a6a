//! Caching implementations for blog types.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::cache::{Cacheable, QueryKey};

use super::types::Post;

// ============================================================================
// Cacheable implementations
// ============================================================================

impl Cacheable for Post {
  fn cache_key(&self) -> String {
    self.metadata.slug.clone()
  }

  fn updated_at(&self) -> DateTime<Utc> {
    self.metadata.updated_at
  }

  fn entity_type() -> &'static str {
    "post"
  }

  fn reuse_body(&mut self, cached: Self) {
    if cached.content.is_some() {
      self.content = cached.content;
    }
  }

  fn is_complete(&self) -> bool {
    self.content.is_some()
  }
}

// ============================================================================
// Query key types
// ============================================================================

/// Query key types for blog API calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlogQueryKey {
  /// Metadata for every post
  PostsMetadata,
  /// Every post with its body
  Posts,
  /// A single post by slug
  Post { slug: String },
}

impl BlogQueryKey {
  /// Key for a single post. The slug is used exactly as given, since the
  /// backend matches it byte for byte.
  pub fn post(slug: &str) -> Self {
    Self::Post {
      slug: slug.to_string(),
    }
  }
}

impl QueryKey for BlogQueryKey {
  fn cache_hash(&self) -> String {
    let input = match self {
      Self::PostsMetadata => "posts_metadata".to_string(),
      Self::Posts => "posts".to_string(),
      Self::Post { slug } => format!("post:{}", slug),
    };

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  fn description(&self) -> String {
    match self {
      Self::PostsMetadata => "post metadata".to_string(),
      Self::Posts => "all posts".to_string(),
      Self::Post { slug } => format!("post {}", slug),
    }
  }

  fn needs_complete(&self) -> bool {
    !matches!(self, Self::PostsMetadata)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::blog::types::PostMetadata;
  use crate::cache::testing::ts;

  fn post(updated: &str, content: Option<&str>) -> Post {
    Post::new(
      PostMetadata {
        slug: "hello".into(),
        title: "Hello".into(),
        created_at: ts("2024-01-01T00:00:00Z"),
        updated_at: ts(updated),
        image: None,
        category: None,
        author: None,
      },
      content.map(String::from),
    )
  }

  #[test]
  fn test_keys_are_distinct_and_stable() {
    let keys = [
      BlogQueryKey::PostsMetadata,
      BlogQueryKey::Posts,
      BlogQueryKey::post("a"),
      BlogQueryKey::post("b"),
    ];
    let hashes: std::collections::HashSet<_> = keys.iter().map(QueryKey::cache_hash).collect();
    assert_eq!(hashes.len(), keys.len());

    assert_eq!(
      BlogQueryKey::post("a").cache_hash(),
      BlogQueryKey::post("a").cache_hash()
    );
    assert_eq!(BlogQueryKey::Posts.cache_hash().len(), 64);
  }

  #[test]
  fn test_slugs_differing_in_case_get_separate_keys() {
    assert_ne!(
      BlogQueryKey::post("Hello").cache_hash(),
      BlogQueryKey::post("hello").cache_hash()
    );
    assert_ne!(
      BlogQueryKey::post(" hello").cache_hash(),
      BlogQueryKey::post("hello").cache_hash()
    );
    assert_eq!(BlogQueryKey::post("Hello").description(), "post Hello");
  }

  #[test]
  fn test_only_metadata_listing_accepts_bodiless_posts() {
    assert!(!BlogQueryKey::PostsMetadata.needs_complete());
    assert!(BlogQueryKey::Posts.needs_complete());
    assert!(BlogQueryKey::post("hello").needs_complete());
  }

  #[test]
  fn test_post_reuses_cached_body_only_when_present() {
    let mut fetched = post("2024-01-01T00:00:00Z", None);
    fetched.reuse_body(post("2024-01-01T00:00:00Z", Some("cached")));
    assert_eq!(fetched.content.as_deref(), Some("cached"));
    assert!(fetched.is_complete());

    let mut fetched = post("2024-01-01T00:00:00Z", Some("fetched"));
    fetched.reuse_body(post("2024-01-01T00:00:00Z", None));
    assert_eq!(fetched.content.as_deref(), Some("fetched"));
  }
}
