use color_eyre::{eyre::eyre, Result};
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};

use super::types::{CacheMode, Network, Request, Response};

/// HTTP client wrapper used by the host runtime
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
}

impl HttpClient {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("shellcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpClient {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    if request.cache_mode == CacheMode::Reload {
      builder = builder
        .header(CACHE_CONTROL, "no-cache")
        .header(PRAGMA, "no-cache");
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status,
      content_type,
      body: body.to_vec(),
    })
  }
}
