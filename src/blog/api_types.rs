//! Serde types matching blog backend request and response bodies.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use serde::{Deserialize, Serialize};

use crate::frontmatter::parse_frontmatter;

use super::types::{Post, PostDraft, PostMetadata};

// ============================================================================
// Responses
// ============================================================================

/// A post with metadata and body kept apart (`posts-separated` endpoints).
#[derive(Debug, Deserialize)]
pub struct ApiSeparatedPost {
  pub metadata: PostMetadata,
  #[serde(default)]
  pub content: String,
}

impl ApiSeparatedPost {
  pub fn into_post(self) -> Post {
    Post::new(self.metadata, Some(self.content))
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiSeparatedPostsResponse {
  #[serde(default)]
  pub posts: Vec<ApiSeparatedPost>,
  #[serde(default)]
  pub total_count: usize,
}

/// A flat post as returned by create and update. The content is the stored
/// document, frontmatter included.
#[derive(Debug, Deserialize)]
pub struct ApiPost {
  #[serde(flatten)]
  pub metadata: PostMetadata,
  #[serde(default)]
  pub content: String,
}

impl ApiPost {
  pub fn into_post(self) -> Post {
    let body = parse_frontmatter(&self.content).body;
    Post::new(self.metadata, Some(body))
  }
}

// ============================================================================
// Requests
// ============================================================================

/// Update body. The backend resets category and author when they are
/// omitted, so every field is sent.
#[derive(Debug, Serialize)]
pub struct ApiPostUpdate<'a> {
  pub title: &'a str,
  pub content: &'a str,
  pub image: Option<&'a str>,
  pub category: Option<&'a str>,
  pub author: Option<&'a str>,
}

impl<'a> From<&'a PostDraft> for ApiPostUpdate<'a> {
  fn from(draft: &'a PostDraft) -> Self {
    Self {
      title: &draft.title,
      content: &draft.content,
      image: draft.image.as_deref(),
      category: draft.category.as_deref(),
      author: draft.author.as_deref(),
    }
  }
}
