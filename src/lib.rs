//! Client-side cache for a blog REST backend.
//!
//! [`cache`] holds the generic pieces: a de-duplicating fetch cache, a
//! persistent record store with a single TTL and the merge policy that
//! reconciles stored and fetched records. [`blog`] wires them to the blog API.

pub mod blog;
pub mod cache;
pub mod config;
pub mod frontmatter;
