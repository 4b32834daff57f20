//! Install and activate phases.

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::Ordering;
use tracing::{debug, error, info, warn};

use super::{Controller, WorkerState, MANIFEST_KEY};
use crate::cache::{CacheStorage, CONTENT, MANIFEST_RECORD, PARTITIONS, STAGING};
use crate::event::{Outcome, Reconciliation};
use crate::manifest::{normalize_key, ResourceManifest};
use crate::net::{Network, Request, Response};

impl<S: CacheStorage, N: Network> Controller<S, N> {
  /// Download the core files into the staging partition.
  ///
  /// The core files are fetched bypassing HTTP caches. If any of them fails
  /// the controller becomes redundant and staging is left untouched.
  pub(super) async fn install(&self) -> Result<Outcome> {
    self.expect_state(WorkerState::Installing)?;

    // Pre-empt the current controller as soon as we are installed
    self.skip_waiting.store(true, Ordering::SeqCst);

    info!(
      controller = %self.id,
      core = self.deployment.core.len(),
      "Installing"
    );

    match self.stage_core_files().await {
      Ok(staged) => {
        self.set_state(WorkerState::Waiting);
        info!(controller = %self.id, staged, "Installed");
        Ok(Outcome::Installed { staged })
      }
      Err(e) => {
        self.set_state(WorkerState::Redundant);
        warn!(controller = %self.id, error = %e, "Install failed");
        Err(e)
      }
    }
  }

  async fn stage_core_files(&self) -> Result<usize> {
    let core: Vec<&str> = self.deployment.core.iter().map(String::as_str).collect();
    let fetched = self.fetch_all(&core, Request::reload).await?;

    // Leftovers of an install that never activated must not leak into content
    self.storage.delete_partition(STAGING)?;
    self.storage.open(STAGING)?.put_all(&fetched)?;

    Ok(fetched.len())
  }

  /// Take control: reconcile the content cache with the deployed manifest.
  ///
  /// Any failure while reconciling deletes every partition, so the next
  /// activation starts from scratch.
  pub(super) async fn activate(&self) -> Result<Outcome> {
    self.expect_state(WorkerState::Waiting)?;
    self.set_state(WorkerState::Activating);

    let outcome = match self.reconcile() {
      Ok(summary) => {
        info!(
          controller = %self.id,
          fresh = summary.fresh,
          retained = summary.retained,
          evicted = summary.evicted,
          promoted = summary.promoted,
          "Activated"
        );
        Outcome::Activated(summary)
      }
      Err(e) => {
        error!(controller = %self.id, error = %e, "Failed to upgrade cache, resetting");
        if let Err(e) = self.reset() {
          error!(controller = %self.id, error = %e, "Failed to reset cache");
        }
        Outcome::Reset
      }
    };

    self.set_state(WorkerState::Active);
    Ok(outcome)
  }

  fn reconcile(&self) -> Result<Reconciliation> {
    let record = self.storage.open(MANIFEST_RECORD)?;
    let staging = self.storage.open(STAGING)?;

    let previous = record
      .lookup(MANIFEST_KEY)?
      .map(|entry| ResourceManifest::from_json(&entry.body))
      .transpose()?;

    let mut summary = Reconciliation::default();

    match previous {
      None => {
        // Nothing tells us what the cached entries are, start over
        self.storage.delete_partition(CONTENT)?;
        summary.fresh = true;
      }
      Some(previous) => {
        let content = self.storage.open(CONTENT)?;
        for stored in content.keys()? {
          let key = normalize_key(&stored);
          let current = self.deployment.resources.checksum(key);

          if current.is_none() || current != previous.checksum(key) {
            debug!(key, "Evicting removed or changed resource");
            content.remove(&stored)?;
            summary.evicted += 1;
          } else {
            summary.retained += 1;
          }
        }
      }
    }

    let staged = staging
      .keys()?
      .into_iter()
      .map(|key| {
        let response = staging
          .lookup(&key)?
          .ok_or_else(|| eyre!("Staged entry {} disappeared", key))?;
        Ok((key, response))
      })
      .collect::<Result<Vec<_>>>()?;

    self.storage.open(CONTENT)?.put_all(&staged)?;
    summary.promoted = staged.len();
    self.storage.delete_partition(STAGING)?;

    let snapshot =
      Response::new(200, self.deployment.resources.to_json()?).with_content_type("application/json");
    record.put(MANIFEST_KEY, &snapshot)?;

    self.clients.claim(&self.id);

    Ok(summary)
  }

  /// Delete all partitions. Every partition is attempted; the first error
  /// is returned.
  pub fn reset(&self) -> Result<()> {
    let mut failed = None;
    for name in PARTITIONS {
      if let Err(e) = self.storage.delete_partition(name) {
        failed.get_or_insert(e);
      }
    }
    failed.map_or(Ok(()), Err)
  }
}
