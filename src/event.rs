use crate::net::{Request, Response};

/// Lifecycle events delivered to the controller by the host
#[derive(Debug, Clone)]
pub enum Event {
  /// Stage the core files for this deployment
  Install,
  /// Take control and reconcile the content cache
  Activate,
  /// An outgoing request from a controlled client
  Fetch(Request),
  /// A message posted by a client; only exact command payloads are recognized
  Message(String),
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
  /// Fresh data from network
  Network,
  /// Served from the content cache
  Cache,
  /// Network unavailable, serving the cached copy
  Offline,
}

/// Summary of a completed activation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
  /// No previous manifest was recorded; content was rebuilt from scratch
  pub fresh: bool,
  /// Entries kept because their checksum did not change
  pub retained: usize,
  /// Entries removed or changed in the new manifest
  pub evicted: usize,
  /// Entries copied over from staging
  pub promoted: usize,
}

/// Result of dispatching one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  /// Core files staged
  Installed { staged: usize },
  /// Content cache reconciled with the deployed manifest
  Activated(Reconciliation),
  /// Activation failed and every partition was deleted
  Reset,
  /// The controller answered a request
  Respond { response: Response, source: Source },
  /// Not intercepted, the host performs the request itself
  Passthrough,
  /// A skip-waiting request was recorded
  SkipWaiting,
  /// Missing resources were downloaded for offline use
  Downloaded { fetched: usize },
  /// The offline download failed; nothing was stored
  DownloadFailed(String),
  /// Unrecognized message payload
  Ignored,
}
