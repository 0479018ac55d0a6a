use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::frontmatter::{parse_frontmatter, render_frontmatter};

/// Lightweight post metadata, as listed by the posts-metadata endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetadata {
  pub slug: String,
  #[serde(default)]
  pub title: String,
  #[serde(default, deserialize_with = "lenient_timestamp")]
  pub created_at: DateTime<Utc>,
  #[serde(deserialize_with = "required_timestamp")]
  pub updated_at: DateTime<Utc>,
  #[serde(default, deserialize_with = "non_empty", skip_serializing_if = "Option::is_none")]
  pub image: Option<String>,
  #[serde(default, deserialize_with = "non_empty", skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
  #[serde(default, deserialize_with = "non_empty", skip_serializing_if = "Option::is_none")]
  pub author: Option<String>,
}

/// A post with its (optional) markdown body.
///
/// Posts built from the metadata listing carry no body until a detail fetch
/// fills it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
  #[serde(flatten)]
  pub metadata: PostMetadata,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content: Option<String>,
}

impl Post {
  pub fn new(metadata: PostMetadata, content: Option<String>) -> Self {
    Self { metadata, content }
  }

  pub fn slug(&self) -> &str {
    &self.metadata.slug
  }

  /// Render the post as a markdown document with a frontmatter block.
  ///
  /// The output is accepted by [`PostDraft::from_markdown`].
  pub fn to_markdown(&self) -> String {
    let meta = &self.metadata;
    let mut fields = BTreeMap::new();
    fields.insert("slug".to_string(), meta.slug.clone());
    fields.insert("title".to_string(), meta.title.clone());
    fields.insert("created_at".to_string(), meta.created_at.to_rfc3339());
    fields.insert("updated_at".to_string(), meta.updated_at.to_rfc3339());
    for (key, value) in [
      ("image", &meta.image),
      ("category", &meta.category),
      ("author", &meta.author),
    ] {
      if let Some(value) = value {
        fields.insert(key.to_string(), value.clone());
      }
    }
    render_frontmatter(&fields, self.content.as_deref().unwrap_or_default())
  }
}

impl From<PostMetadata> for Post {
  fn from(metadata: PostMetadata) -> Self {
    Self::new(metadata, None)
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DraftError {
  #[error("Missing frontmatter field: {0}")]
  MissingField(&'static str),

  #[error("Invalid slug {0:?}: use lowercase letters, numbers and hyphens")]
  InvalidSlug(String),
}

/// A post to create or update, usually read from a markdown file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostDraft {
  pub slug: String,
  pub title: String,
  /// Markdown body without frontmatter
  pub content: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub author: Option<String>,
}

impl PostDraft {
  /// Build a draft from a markdown document.
  ///
  /// Reads `slug`, `title`, `image`, `category` and `author` from the
  /// frontmatter. `default_slug` is used when the document names none.
  pub fn from_markdown(raw: &str, default_slug: Option<&str>) -> Result<Self, DraftError> {
    let doc = parse_frontmatter(raw);
    let owned = |key: &str| doc.get(key).map(str::to_string);

    let slug = owned("slug")
      .or_else(|| default_slug.map(str::to_string))
      .ok_or(DraftError::MissingField("slug"))?;
    let title = owned("title").ok_or(DraftError::MissingField("title"))?;

    let draft = Self {
      slug: String::new(),
      title,
      content: doc.body.clone(),
      image: owned("image"),
      category: owned("category"),
      author: owned("author"),
    };
    draft.with_slug(slug)
  }

  /// Replace the slug, validating it.
  pub fn with_slug(mut self, slug: impl Into<String>) -> Result<Self, DraftError> {
    let slug = slug.into();
    if !is_valid_slug(&slug) {
      return Err(DraftError::InvalidSlug(slug));
    }
    self.slug = slug;
    Ok(self)
  }
}

pub fn is_valid_slug(slug: &str) -> bool {
  !slug.is_empty()
    && slug
      .chars()
      .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Parse a server timestamp.
///
/// Accepts RFC 3339 and naive ISO 8601 date-times (read as UTC), with or
/// without fractional seconds, and bare dates.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
  let s = s.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
      return Some(naive.and_utc());
    }
  }
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .ok()
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .map(|naive| naive.and_utc())
}

fn required_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
  D: Deserializer<'de>,
{
  let s = String::deserialize(deserializer)?;
  parse_timestamp(&s).ok_or_else(|| D::Error::custom(format!("invalid timestamp {s:?}")))
}

/// Empty or missing timestamps fall back to the epoch.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
  D: Deserializer<'de>,
{
  let s = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
  if s.trim().is_empty() {
    return Ok(DateTime::default());
  }
  parse_timestamp(&s).ok_or_else(|| D::Error::custom(format!("invalid timestamp {s:?}")))
}

fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  let v = Option::<String>::deserialize(deserializer)?;
  Ok(v.filter(|s| !s.trim().is_empty()))
}
