//! Request and response types shared by the network and cache layers.

use color_eyre::Result;
use reqwest::Method;
use std::future::Future;
use url::Url;

/// How a request should treat intermediate HTTP caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
  /// Normal HTTP caching rules apply
  #[default]
  Default,
  /// Force retrieval from the origin server
  Reload,
}

/// An outgoing request as seen by the controller.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub cache_mode: CacheMode,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      cache_mode: CacheMode::Default,
    }
  }

  /// A GET that bypasses any HTTP cache on the way.
  pub fn reload(url: Url) -> Self {
    Self {
      cache_mode: CacheMode::Reload,
      ..Self::get(url)
    }
  }
}

/// A response body with the metadata needed to replay it from cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      content_type: None,
      body: body.into(),
    }
  }

  pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
    self.content_type = Some(content_type.into());
    self
  }

  /// Whether the status is in the 2xx range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Network fetch primitive.
///
/// An `Err` means the request never produced a response (connection failure,
/// DNS, TLS...). HTTP error statuses are returned as `Ok` responses.
pub trait Network: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}
