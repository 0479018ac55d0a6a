pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod types;

pub use cache::BlogQueryKey;
pub use cached_client::{CacheStatus, CachedBlogClient};
pub use client::BlogClient;
pub use types::{DraftError, Post, PostDraft, PostMetadata};
