use std::sync::{Mutex, PoisonError};
use tracing::info;

/// Client-notification primitive offered by the host.
pub trait Clients: Send + Sync {
  /// Put every open client under `controller` immediately, without waiting
  /// for the next navigation.
  fn claim(&self, controller: &str);
}

/// Host-side registry of which controller the open clients are bound to.
#[derive(Default)]
pub struct ClientRegistry {
  controller: Mutex<Option<String>>,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Controller currently in charge of the clients, if any.
  pub fn controller(&self) -> Option<String> {
    self
      .controller
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }
}

impl Clients for ClientRegistry {
  fn claim(&self, controller: &str) {
    let previous = self
      .controller
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .replace(controller.to_string());

    info!(
      controller,
      previous = previous.as_deref().unwrap_or("none"),
      "Clients claimed"
    );
  }
}
