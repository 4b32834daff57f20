//! Fetch interception: routing and the two serving strategies.

use color_eyre::Result;
use reqwest::Method;
use tracing::{debug, warn};
use url::Url;

use super::{Controller, WorkerState};
use crate::cache::{CacheStorage, Partition, CONTENT};
use crate::event::{Outcome, Source};
use crate::manifest::ROOT_KEY;
use crate::net::{Network, Request, Response};

/// Compute the resource key a request URL maps to.
///
/// Returns `None` for URLs outside `origin`. A `?v=` cache-busting suffix is
/// dropped, and the origin itself or any client-side route (`/#...`) maps to
/// the root key.
pub fn request_key(url: &Url, origin: &str) -> Option<String> {
  let rest = url.as_str().strip_prefix(origin)?;
  let rest = if rest.is_empty() {
    rest
  } else {
    rest.strip_prefix('/')?
  };

  if rest.starts_with('#') {
    return Some(ROOT_KEY.to_string());
  }

  let key = match rest.find("?v=") {
    Some(idx) => &rest[..idx],
    None => rest,
  };

  if key.is_empty() {
    Some(ROOT_KEY.to_string())
  } else {
    Some(key.to_string())
  }
}

impl<S: CacheStorage, N: Network> Controller<S, N> {
  pub(super) async fn intercept(&self, request: &Request) -> Result<Outcome> {
    if self.state() != WorkerState::Active {
      debug!(url = %request.url, state = %self.state(), "Not controlling, passing through");
      return Ok(Outcome::Passthrough);
    }

    if request.method != Method::GET {
      return Ok(Outcome::Passthrough);
    }

    let key = match request_key(&request.url, &self.origin) {
      Some(key) if self.deployment.resources.contains(&key) => key,
      _ => {
        debug!(url = %request.url, "Not a manifest resource, passing through");
        return Ok(Outcome::Passthrough);
      }
    };

    if key == ROOT_KEY {
      self.online_first(&key, request).await
    } else {
      self.cache_first(&key, request).await
    }
  }

  /// Serve the entry document from the network, keeping a copy for when the
  /// network is gone.
  async fn online_first(&self, key: &str, request: &Request) -> Result<Outcome> {
    let content = self.storage.open(CONTENT)?;

    match self.network.fetch(request).await {
      Ok(response) => {
        self.store(&content, key, &response);
        Ok(Outcome::Respond {
          response,
          source: Source::Network,
        })
      }
      Err(e) => match content.lookup(key)? {
        Some(cached) => {
          warn!(key, error = %e, "Network unavailable, serving cached copy");
          Ok(Outcome::Respond {
            response: cached,
            source: Source::Offline,
          })
        }
        None => Err(e),
      },
    }
  }

  /// Serve from the content cache, populating it lazily on a miss.
  async fn cache_first(&self, key: &str, request: &Request) -> Result<Outcome> {
    let content = self.storage.open(CONTENT)?;

    if let Some(cached) = content.lookup(key)? {
      debug!(key, "Cache hit");
      return Ok(Outcome::Respond {
        response: cached,
        source: Source::Cache,
      });
    }

    let response = self.network.fetch(request).await?;
    if response.is_ok() {
      self.store(&content, key, &response);
    } else {
      debug!(key, status = response.status, "Not caching unsuccessful response");
    }

    Ok(Outcome::Respond {
      response,
      source: Source::Network,
    })
  }

  /// Keep a copy of a network response. A failed write only costs the copy.
  fn store(&self, content: &Partition<'_, S>, key: &str, response: &Response) {
    if let Err(e) = content.put(key, response) {
      warn!(key, error = %e, "Failed to cache response");
    }
  }
}
