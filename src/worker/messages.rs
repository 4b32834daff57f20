//! Client message commands.

use color_eyre::Result;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

use super::Controller;
use crate::cache::{CacheStorage, CONTENT};
use crate::commands::{self, MessageKind};
use crate::event::Outcome;
use crate::manifest::normalize_key;
use crate::net::{Network, Request};

impl<S: CacheStorage, N: Network> Controller<S, N> {
  pub(super) async fn on_message(&self, payload: &str) -> Result<Outcome> {
    match commands::from_payload(payload) {
      Some(MessageKind::SkipWaiting) => {
        self.skip_waiting.store(true, Ordering::SeqCst);
        info!(controller = %self.id, state = %self.state(), "Skip waiting requested");
        Ok(Outcome::SkipWaiting)
      }
      Some(MessageKind::DownloadOffline) => match self.download_offline().await {
        Ok(fetched) => Ok(Outcome::Downloaded { fetched }),
        Err(e) => {
          warn!(controller = %self.id, error = %e, "Offline download failed");
          Ok(Outcome::DownloadFailed(e.to_string()))
        }
      },
      None => {
        debug!(payload, "Ignoring unrecognized message");
        Ok(Outcome::Ignored)
      }
    }
  }

  /// Fetch every manifest resource that is not in the content cache yet.
  ///
  /// The batch is stored only if every resource was fetched successfully.
  async fn download_offline(&self) -> Result<usize> {
    let content = self.storage.open(CONTENT)?;

    let present: HashSet<String> = content
      .keys()?
      .iter()
      .map(|key| normalize_key(key).to_string())
      .collect();

    let missing: Vec<&str> = self
      .deployment
      .resources
      .keys()
      .filter(|key| !present.contains(*key))
      .collect();

    if missing.is_empty() {
      return Ok(0);
    }

    info!(controller = %self.id, missing = missing.len(), "Downloading resources for offline use");

    let fetched = self.fetch_all(&missing, Request::get).await?;
    content.put_all(&fetched)?;

    Ok(fetched.len())
  }
}

#[cfg(test)]
mod tests {
  use crate::cache::{CacheStorage, CONTENT};
  use crate::event::{Event, Outcome};
  use crate::net::Response;
  use crate::testing::{fixture, Failure};

  #[tokio::test]
  async fn test_skip_waiting_message() {
    let fixture = fixture(&[("a.js", "1")], &[]);
    let controller = fixture.controller();
    assert!(!controller.skip_waiting_requested());

    let outcome = controller
      .handle(Event::Message("skipWaiting".to_string()))
      .await
      .unwrap();

    assert_eq!(outcome, Outcome::SkipWaiting);
    assert!(controller.skip_waiting_requested());
  }

  #[tokio::test]
  async fn test_unknown_message_is_ignored() {
    let fixture = fixture(&[("a.js", "1")], &[]);
    let controller = fixture.controller();

    for payload in ["", "skip-waiting", "{\"type\":\"skipWaiting\"}"] {
      let outcome = controller
        .handle(Event::Message(payload.to_string()))
        .await
        .unwrap();
      assert_eq!(outcome, Outcome::Ignored);
    }
    assert!(!controller.skip_waiting_requested());
  }

  #[tokio::test]
  async fn test_download_offline_fetches_missing_only() {
    let fixture = fixture(&[("/", "0"), ("a.js", "1"), ("b.js", "2")], &[]);
    fixture
      .storage
      .put(CONTENT, "a.js", &Response::new(200, "cached"))
      .unwrap();
    let controller = fixture.controller();
    controller.resume();

    let outcome = controller
      .handle(Event::Message("downloadOffline".to_string()))
      .await
      .unwrap();

    assert_eq!(outcome, Outcome::Downloaded { fetched: 2 });
    let mut fetched = fixture.network.fetched_keys();
    fetched.sort();
    assert_eq!(fetched, vec!["/", "b.js"]);
    assert_eq!(
      fixture.storage.keys(CONTENT).unwrap(),
      vec!["/", "a.js", "b.js"]
    );
    assert_eq!(
      fixture.storage.lookup(CONTENT, "a.js").unwrap().unwrap().body,
      b"cached"
    );
  }

  #[tokio::test]
  async fn test_download_offline_is_all_or_nothing() {
    let fixture = fixture(&[("a.js", "1"), ("b.js", "2")], &[]);
    fixture.network.fail("b.js", Failure::Offline);
    let controller = fixture.controller();

    let outcome = controller
      .handle(Event::Message("downloadOffline".to_string()))
      .await
      .unwrap();

    assert!(matches!(outcome, Outcome::DownloadFailed(_)));
    assert!(fixture.storage.keys(CONTENT).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_download_offline_with_complete_cache() {
    let fixture = fixture(&[("a.js", "1")], &[]);
    fixture
      .storage
      .put(CONTENT, "a.js", &Response::new(200, "a"))
      .unwrap();
    let controller = fixture.controller();

    let outcome = controller
      .handle(Event::Message("downloadOffline".to_string()))
      .await
      .unwrap();

    assert_eq!(outcome, Outcome::Downloaded { fetched: 0 });
    assert!(fixture.network.requests().is_empty());
  }
}
