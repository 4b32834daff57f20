//! Cache lifecycle controller.
//!
//! One [`Controller`] exists per deployment. The host drives it through
//! [`Controller::handle`]:
//!
//! ```text
//! Installing --install ok--> Waiting --activate--> Activating --> Active
//!     |
//!     +--install failed--> Redundant
//! ```
//!
//! The controller owns no global state: the cache partitions, the network
//! and the client registry are all injected.

mod clients;
mod intercept;
mod lifecycle;
mod messages;

pub use clients::{ClientRegistry, Clients};
pub use intercept::request_key;

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use url::Url;

use crate::cache::CacheStorage;
use crate::event::{Event, Outcome};
use crate::manifest::Deployment;
use crate::net::{Network, Request, Response};

/// Key of the single entry in the manifest-record partition.
pub const MANIFEST_KEY: &str = "manifest";

/// Lifecycle state of a controller instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  /// Installed, waiting to take over from the previous controller
  Waiting,
  Activating,
  Active,
  /// Install failed; this instance will never activate
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Installing => "installing",
      Self::Waiting => "waiting",
      Self::Activating => "activating",
      Self::Active => "active",
      Self::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

/// Keeps the content cache consistent with one deployed manifest.
pub struct Controller<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  clients: Arc<dyn Clients>,
  deployment: Deployment,
  /// Serialized origin, e.g. `https://app.example.com`
  origin: String,
  /// Origin with a trailing slash, for resolving resource keys
  base: Url,
  /// Short manifest digest identifying this controller in logs
  id: String,
  state: RwLock<WorkerState>,
  skip_waiting: AtomicBool,
}

impl<S: CacheStorage, N: Network> Controller<S, N> {
  /// Create a controller for `deployment`, served from `origin`.
  pub fn new(
    deployment: Deployment,
    origin: &Url,
    storage: Arc<S>,
    network: Arc<N>,
    clients: Arc<dyn Clients>,
  ) -> Result<Self> {
    let origin = origin.origin();
    if !origin.is_tuple() {
      return Err(eyre!("Origin must be an http(s) URL"));
    }
    let origin = origin.ascii_serialization();
    let base = Url::parse(&format!("{}/", origin))
      .map_err(|e| eyre!("Invalid origin {}: {}", origin, e))?;

    let mut id = deployment.resources.digest()?;
    id.truncate(12);

    Ok(Self {
      storage,
      network,
      clients,
      deployment,
      origin,
      base,
      id,
      state: RwLock::new(WorkerState::Installing),
      skip_waiting: AtomicBool::new(false),
    })
  }

  /// Dispatch a single host event.
  pub async fn handle(&self, event: Event) -> Result<Outcome> {
    match event {
      Event::Install => self.install().await,
      Event::Activate => self.activate().await,
      Event::Fetch(request) => self.intercept(&request).await,
      Event::Message(payload) => self.on_message(&payload).await,
    }
  }

  /// Resume control for a deployment whose activation already completed in
  /// an earlier run.
  pub fn resume(&self) {
    self.set_state(WorkerState::Active);
    self.clients.claim(&self.id);
  }

  pub fn state(&self) -> WorkerState {
    *self.state.read().unwrap_or_else(PoisonError::into_inner)
  }

  /// Whether this instance asked to replace the current controller without
  /// waiting for clients to close.
  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn deployment(&self) -> &Deployment {
    &self.deployment
  }

  pub fn origin(&self) -> &str {
    &self.origin
  }

  fn set_state(&self, state: WorkerState) {
    *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
  }

  fn expect_state(&self, expected: WorkerState) -> Result<()> {
    let state = self.state();
    if state != expected {
      return Err(eyre!(
        "Controller {} is {}, expected {}",
        self.id,
        state,
        expected
      ));
    }
    Ok(())
  }

  /// Absolute URL of a resource key.
  fn resource_url(&self, key: &str) -> Result<Url> {
    let path = key.strip_prefix('/').unwrap_or(key);
    self
      .base
      .join(path)
      .map_err(|e| eyre!("Invalid resource key '{}': {}", key, e))
  }

  /// Fetch a batch of resources concurrently. Fails as a whole if any
  /// request fails or returns a non-success status.
  async fn fetch_all<F>(&self, keys: &[&str], make_request: F) -> Result<Vec<(String, Response)>>
  where
    F: Fn(Url) -> Request,
  {
    let requests = keys
      .iter()
      .map(|key| Ok((key.to_string(), make_request(self.resource_url(key)?))))
      .collect::<Result<Vec<_>>>()?;

    try_join_all(requests.into_iter().map(|(key, request)| async move {
      let response = self.network.fetch(&request).await?;
      if !response.is_ok() {
        return Err(eyre!(
          "Fetching {} returned status {}",
          request.url,
          response.status
        ));
      }
      Ok((key, response))
    }))
    .await
  }
}
