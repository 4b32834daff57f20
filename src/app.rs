//! Host runtime: owns the injected capabilities and drives the controller
//! through its lifecycle.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheStorage, EntryInfo, CONTENT, MANIFEST_RECORD, PARTITIONS};
use crate::config::Config;
use crate::event::{Event, Outcome, Source};
use crate::manifest::{Deployment, ResourceManifest};
use crate::net::{Network, Request, Response};
use crate::worker::{ClientRegistry, Controller, WorkerState, MANIFEST_KEY};

/// What [`App::start`] had to do to bring the deployment under control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Startup {
  /// The recorded manifest already matches; nothing was downloaded
  Resumed,
  /// Installed and activated
  Updated(Outcome),
}

/// How a fetched response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  Controller(Source),
  /// The controller did not intercept; the host fetched it directly
  Passthrough,
}

#[derive(Debug, Clone)]
pub struct Fetched {
  pub url: Url,
  pub response: Response,
  pub route: Route,
}

/// Snapshot of one partition for status output.
#[derive(Debug, Clone)]
pub struct PartitionStatus {
  pub name: &'static str,
  pub exists: bool,
  pub entries: Vec<EntryInfo>,
}

#[derive(Debug, Clone)]
pub struct Status {
  pub controller: String,
  pub state: WorkerState,
  /// Controller the open clients are bound to, if any
  pub claimed_by: Option<String>,
  pub resources: usize,
  /// Whether the manifest record matches the deployed manifest
  pub record_current: bool,
  pub partitions: Vec<PartitionStatus>,
  /// Manifest keys not present in the content partition
  pub missing: Vec<String>,
}

/// Main application state
pub struct App<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  clients: Arc<ClientRegistry>,
  controller: Controller<S, N>,
}

impl<S: CacheStorage, N: Network> App<S, N> {
  pub fn new(
    config: &Config,
    deployment: Deployment,
    storage: Arc<S>,
    network: Arc<N>,
  ) -> Result<Self> {
    let clients = Arc::new(ClientRegistry::new());
    let controller = Controller::new(
      deployment,
      &config.origin,
      storage.clone(),
      network.clone(),
      clients.clone(),
    )?;

    Ok(Self {
      storage,
      network,
      clients,
      controller,
    })
  }

  pub fn controller(&self) -> &Controller<S, N> {
    &self.controller
  }

  /// Register the deployment: run install and activate unless the recorded
  /// manifest shows this deployment is already active.
  pub async fn start(&self, force: bool) -> Result<Startup> {
    if !force && self.record_is_current()? {
      info!(controller = %self.controller.id(), "Deployment already active");
      self.controller.resume();
      return Ok(Startup::Resumed);
    }

    self
      .controller
      .handle(Event::Install)
      .await
      .map_err(|e| eyre!("Install failed, previous cache left in place: {}", e))?;

    // Install always asks to skip waiting, so activation follows directly
    let outcome = self.controller.handle(Event::Activate).await?;
    Ok(Startup::Updated(outcome))
  }

  /// Deliver a message to the controller.
  pub async fn message(&self, payload: &str) -> Result<Outcome> {
    self
      .controller
      .handle(Event::Message(payload.to_string()))
      .await
  }

  /// Dispatch GET requests concurrently. Requests the controller does not
  /// intercept go straight to the network.
  pub async fn fetch(&self, urls: &[Url]) -> Vec<Result<Fetched>> {
    join_all(urls.iter().map(|url| self.fetch_one(url))).await
  }

  async fn fetch_one(&self, url: &Url) -> Result<Fetched> {
    let request = Request::get(url.clone());

    match self.controller.handle(Event::Fetch(request.clone())).await? {
      Outcome::Respond { response, source } => Ok(Fetched {
        url: url.clone(),
        response,
        route: Route::Controller(source),
      }),
      Outcome::Passthrough => {
        let response = self.network.fetch(&request).await?;
        Ok(Fetched {
          url: url.clone(),
          response,
          route: Route::Passthrough,
        })
      }
      other => Err(eyre!("Unexpected outcome for {}: {:?}", url, other)),
    }
  }

  /// Delete every partition.
  pub fn reset(&self) -> Result<()> {
    warn!("Deleting all cache partitions");
    self.controller.reset()
  }

  pub fn status(&self) -> Result<Status> {
    let partitions = PARTITIONS
      .iter()
      .map(|&name| {
        Ok(PartitionStatus {
          name,
          exists: self.storage.has_partition(name)?,
          entries: self.storage.entries(name)?,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    let cached = self.storage.keys(CONTENT)?;
    let resources = &self.controller.deployment().resources;
    let missing = resources
      .keys()
      .filter(|key| !cached.iter().any(|c| c.as_str() == *key))
      .map(String::from)
      .collect();

    Ok(Status {
      controller: self.controller.id().to_string(),
      state: self.controller.state(),
      claimed_by: self.clients.controller(),
      resources: resources.len(),
      record_current: self.record_is_current()?,
      partitions,
      missing,
    })
  }

  /// Whether the manifest record holds exactly the deployed manifest.
  fn record_is_current(&self) -> Result<bool> {
    let Some(entry) = self.storage.lookup(MANIFEST_RECORD, MANIFEST_KEY)? else {
      return Ok(false);
    };

    match ResourceManifest::from_json(&entry.body) {
      Ok(recorded) => Ok(recorded == self.controller.deployment().resources),
      Err(e) => {
        warn!(error = %e, "Unreadable manifest record");
        Ok(false)
      }
    }
  }
}
