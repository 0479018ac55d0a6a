use color_eyre::{eyre::eyre, Result};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::blog::api_types::{ApiPost, ApiPostUpdate, ApiSeparatedPost, ApiSeparatedPostsResponse};
use crate::blog::types::{Post, PostDraft, PostMetadata};
use crate::cache::FetchError;
use crate::config::Config;

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Blog REST API client.
///
/// Clone is cheap, the underlying `reqwest::Client` shares its pool.
#[derive(Clone)]
pub struct BlogClient {
  http: Client,
  base: Url,
  token: Option<String>,
}

impl BlogClient {
  pub fn new(config: &Config) -> Result<Self> {
    Self::with_base_url(&config.api.url, Config::get_api_token())
  }

  pub fn with_base_url(base: &str, token: Option<String>) -> Result<Self> {
    let base = Url::parse(base).map_err(|e| eyre!("Invalid API url {}: {}", base, e))?;
    if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
      return Err(eyre!("API url must be an http(s) address, got {}", base));
    }

    let http = Client::builder()
      .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base, token })
  }

  /// List metadata for every post (no bodies).
  pub async fn list_metadata(&self) -> Result<Vec<PostMetadata>, FetchError> {
    let url = self.endpoint(&["posts-metadata"]);
    self.send_json(self.request(Method::GET, url)).await
  }

  /// List every post with its body.
  pub async fn list_posts(&self) -> Result<Vec<Post>, FetchError> {
    let url = self.endpoint(&["posts-separated"]);
    let response: ApiSeparatedPostsResponse = self.send_json(self.request(Method::GET, url)).await?;
    debug!(count = response.posts.len(), total = response.total_count, "listed posts");
    Ok(
      response
        .posts
        .into_iter()
        .map(ApiSeparatedPost::into_post)
        .collect(),
    )
  }

  /// Get a single post with its body.
  pub async fn get_post(&self, slug: &str) -> Result<Post, FetchError> {
    let url = self.endpoint(&["posts-separated", slug]);
    let post: ApiSeparatedPost = self.send_json(self.request(Method::GET, url)).await?;
    Ok(post.into_post())
  }

  pub async fn create_post(&self, draft: &PostDraft) -> Result<Post, FetchError> {
    let url = self.endpoint(&["posts"]);
    let post: ApiPost = self
      .send_json(self.request(Method::POST, url).json(draft))
      .await?;
    Ok(post.into_post())
  }

  pub async fn update_post(&self, draft: &PostDraft) -> Result<Post, FetchError> {
    let url = self.endpoint(&["posts", &draft.slug]);
    let post: ApiPost = self
      .send_json(self.request(Method::PUT, url).json(&ApiPostUpdate::from(draft)))
      .await?;
    Ok(post.into_post())
  }

  pub async fn delete_post(&self, slug: &str) -> Result<(), FetchError> {
    let url = self.endpoint(&["posts", slug]);
    self.send(self.request(Method::DELETE, url)).await?;
    Ok(())
  }

  /// `{base}/api/blog/{segments...}`, each segment percent-encoded.
  fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path
        .pop_if_empty()
        .extend(["api", "blog"])
        .extend(segments);
    }
    url
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    let req = self.http.request(method, url);
    match self.token {
      Some(ref token) => req.bearer_auth(token),
      None => req,
    }
  }

  async fn send(&self, req: RequestBuilder) -> Result<String, FetchError> {
    let response = req
      .send()
      .await
      .map_err(|e| FetchError::Network(e.to_string()))?;

    let status = response.status();
    let body = response
      .text()
      .await
      .map_err(|e| FetchError::Network(e.to_string()))?;

    if status.is_success() {
      Ok(body)
    } else {
      Err(error_for_status(status, &body))
    }
  }

  async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, FetchError> {
    let body = self.send(req).await?;
    serde_json::from_str(&body).map_err(|e| FetchError::InvalidResponse(e.to_string()))
  }
}

/// Map a non-success status and its body to a typed error.
pub fn error_for_status(status: StatusCode, body: &str) -> FetchError {
  let truncated = truncate_body(body);
  match status.as_u16() {
    401 => FetchError::Unauthorized,
    403 => FetchError::Forbidden(truncated),
    404 => FetchError::NotFound(truncated),
    409 => FetchError::Conflict(truncated),
    429 => FetchError::RateLimited,
    500..=599 => FetchError::Server(truncated),
    _ => FetchError::InvalidResponse(format!("Status {}: {}", status, truncated)),
  }
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
  if body.len() <= MAX_ERROR_BODY_LENGTH {
    return body.to_string();
  }
  let mut end = MAX_ERROR_BODY_LENGTH;
  while !body.is_char_boundary(end) {
    end -= 1;
  }
  format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;
  use tokio::task::JoinHandle;

  /// Answer a single HTTP request with `status` and `body`; the handle
  /// resolves to the raw request head.
  async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut head = Vec::new();
      let mut buf = [0u8; 1024];
      while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
          break;
        }
        head.extend_from_slice(&buf[..n]);
      }
      let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
      );
      socket.write_all(response.as_bytes()).await.unwrap();
      socket.shutdown().await.ok();
      String::from_utf8_lossy(&head).into_owned()
    });

    (format!("http://{}", addr), handle)
  }

  #[test]
  fn test_status_mapping() {
    assert_eq!(
      error_for_status(StatusCode::UNAUTHORIZED, "nope"),
      FetchError::Unauthorized
    );
    assert_eq!(
      error_for_status(StatusCode::FORBIDDEN, "denied"),
      FetchError::Forbidden("denied".into())
    );
    assert_eq!(
      error_for_status(StatusCode::NOT_FOUND, "gone"),
      FetchError::NotFound("gone".into())
    );
    assert_eq!(
      error_for_status(StatusCode::CONFLICT, "exists"),
      FetchError::Conflict("exists".into())
    );
    assert_eq!(
      error_for_status(StatusCode::TOO_MANY_REQUESTS, ""),
      FetchError::RateLimited
    );
    assert_eq!(
      error_for_status(StatusCode::BAD_GATEWAY, "upstream"),
      FetchError::Server("upstream".into())
    );
    assert_eq!(
      error_for_status(StatusCode::BAD_REQUEST, "bad slug"),
      FetchError::InvalidResponse("Status 400 Bad Request: bad slug".into())
    );
  }

  #[test]
  fn test_truncate_body() {
    let short = "x".repeat(MAX_ERROR_BODY_LENGTH);
    assert_eq!(truncate_body(&short), short);

    let long = "é".repeat(MAX_ERROR_BODY_LENGTH);
    let truncated = truncate_body(&long);
    assert!(truncated.ends_with(&format!("(truncated, {} total bytes)", long.len())));
    assert!(truncated.len() < long.len());
  }

  #[test]
  fn test_endpoint_building() {
    let client = BlogClient::with_base_url("https://api.example.com", None).unwrap();
    assert_eq!(
      client.endpoint(&["posts-separated", "hello world"]).as_str(),
      "https://api.example.com/api/blog/posts-separated/hello%20world"
    );

    let prefixed = BlogClient::with_base_url("https://example.com/backend/", None).unwrap();
    assert_eq!(
      prefixed.endpoint(&["posts-metadata"]).as_str(),
      "https://example.com/backend/api/blog/posts-metadata"
    );
  }

  #[test]
  fn test_rejects_non_http_urls() {
    assert!(BlogClient::with_base_url("not a url", None).is_err());
    assert!(BlogClient::with_base_url("mailto:me@example.com", None).is_err());
    assert!(BlogClient::with_base_url("ftp://example.com", None).is_err());
  }

  #[tokio::test]
  async fn test_get_post_sends_token_and_parses_body() {
    let (base, server) = serve_once(
      "200 OK",
      r#"{"metadata": {"slug": "hello", "title": "Hello", "created_at": "2024-01-01T00:00:00", "updated_at": "2024-01-02T00:00:00"}, "content": "Hi"}"#,
    )
    .await;
    let client = BlogClient::with_base_url(&base, Some("secret".into())).unwrap();

    let post = client.get_post("hello").await.unwrap();
    assert_eq!(post.slug(), "hello");
    assert_eq!(post.content.as_deref(), Some("Hi"));

    let head = server.await.unwrap();
    assert!(head.starts_with("GET /api/blog/posts-separated/hello HTTP/1.1"));
    assert!(head.to_lowercase().contains("authorization: bearer secret"));
  }

  #[tokio::test]
  async fn test_error_status_is_typed() {
    let (base, server) = serve_once("404 Not Found", r#"{"detail":"Blog post not found"}"#).await;
    let client = BlogClient::with_base_url(&base, None).unwrap();

    let err = client.delete_post("missing").await.unwrap_err();
    assert_eq!(
      err,
      FetchError::NotFound(r#"{"detail":"Blog post not found"}"#.into())
    );

    let head = server.await.unwrap();
    assert!(head.starts_with("DELETE /api/blog/posts/missing HTTP/1.1"));
    assert!(!head.to_lowercase().contains("authorization"));
  }

  #[tokio::test]
  async fn test_malformed_json_is_invalid_response() {
    let (base, _server) = serve_once("200 OK", "[{").await;
    let client = BlogClient::with_base_url(&base, None).unwrap();

    assert!(matches!(
      client.list_metadata().await,
      Err(FetchError::InvalidResponse(_))
    ));
  }

  #[tokio::test]
  async fn test_connection_failure_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let client = BlogClient::with_base_url(&base, None).unwrap();
    assert!(matches!(
      client.list_posts().await,
      Err(FetchError::Network(_))
    ));
  }
}
