//! Test doubles for the controller's injected capabilities.

use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::{CacheStorage, EntryInfo, MemoryStorage};
use crate::manifest::{Deployment, ResourceManifest};
use crate::net::{Network, Request, Response};
use crate::worker::{request_key, ClientRegistry, Controller};

pub const ORIGIN: &str = "https://app.example.com";

/// How a stubbed request should misbehave.
#[derive(Debug, Clone, Copy)]
pub enum Failure {
  /// No response at all
  Offline,
  /// Respond with this status
  Status(u16),
}

/// Network stub answering `network:<key>` for every resource and recording
/// each request it sees.
#[derive(Default)]
pub struct StubNetwork {
  failures: Mutex<HashMap<String, Failure>>,
  requests: Mutex<Vec<Request>>,
}

impl StubNetwork {
  pub fn fail(&self, key: &str, failure: Failure) {
    self
      .failures
      .lock()
      .unwrap()
      .insert(key.to_string(), failure);
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }

  /// Resource keys of every request seen, in order.
  pub fn fetched_keys(&self) -> Vec<String> {
    self
      .requests()
      .iter()
      .filter_map(|r| request_key(&r.url, ORIGIN))
      .collect()
  }
}

impl Network for StubNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.requests.lock().unwrap().push(request.clone());

    let key = request_key(&request.url, ORIGIN).unwrap_or_default();
    let failure = self.failures.lock().unwrap().get(&key).copied();

    match failure {
      Some(Failure::Offline) => Err(eyre!("Failed to fetch {}: network offline", request.url)),
      Some(Failure::Status(status)) => Ok(Response::new(status, "error")),
      None => Ok(Response::new(200, format!("network:{}", key))),
    }
  }
}

/// In-memory storage that can be told to fail writes to a partition.
#[derive(Default)]
pub struct TestStorage {
  inner: MemoryStorage,
  failing_puts: Mutex<HashSet<String>>,
  failing_deletes: Mutex<HashSet<String>>,
}

impl TestStorage {
  pub fn fail_on_put(&self, partition: &str) {
    self
      .failing_puts
      .lock()
      .unwrap()
      .insert(partition.to_string());
  }

  pub fn fail_on_delete(&self, partition: &str) {
    self
      .failing_deletes
      .lock()
      .unwrap()
      .insert(partition.to_string());
  }

  fn check_put(&self, partition: &str) -> Result<()> {
    if self.failing_puts.lock().unwrap().contains(partition) {
      return Err(eyre!("Injected write failure on {}", partition));
    }
    Ok(())
  }
}

impl CacheStorage for TestStorage {
  fn create_partition(&self, name: &str) -> Result<()> {
    self.inner.create_partition(name)
  }

  fn has_partition(&self, name: &str) -> Result<bool> {
    self.inner.has_partition(name)
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    if self.failing_deletes.lock().unwrap().contains(name) {
      return Err(eyre!("Injected delete failure on {}", name));
    }
    self.inner.delete_partition(name)
  }

  fn lookup(&self, partition: &str, key: &str) -> Result<Option<Response>> {
    self.inner.lookup(partition, key)
  }

  fn put(&self, partition: &str, key: &str, response: &Response) -> Result<()> {
    self.check_put(partition)?;
    self.inner.put(partition, key, response)
  }

  fn put_all(&self, partition: &str, entries: &[(String, Response)]) -> Result<()> {
    self.check_put(partition)?;
    self.inner.put_all(partition, entries)
  }

  fn remove(&self, partition: &str, key: &str) -> Result<bool> {
    self.inner.remove(partition, key)
  }

  fn keys(&self, partition: &str) -> Result<Vec<String>> {
    self.inner.keys(partition)
  }

  fn entries(&self, partition: &str) -> Result<Vec<EntryInfo>> {
    self.inner.entries(partition)
  }
}

/// Everything a controller needs, with handles kept for assertions.
pub struct Fixture {
  pub deployment: Deployment,
  pub storage: Arc<TestStorage>,
  pub network: Arc<StubNetwork>,
  pub clients: Arc<ClientRegistry>,
}

impl Fixture {
  pub fn controller(&self) -> Controller<TestStorage, StubNetwork> {
    Controller::new(
      self.deployment.clone(),
      &Url::parse(ORIGIN).unwrap(),
      self.storage.clone(),
      self.network.clone(),
      self.clients.clone(),
    )
    .unwrap()
  }
}

pub fn fixture(resources: &[(&str, &str)], core: &[&str]) -> Fixture {
  let manifest: ResourceManifest = resources.iter().copied().collect();
  let deployment =
    Deployment::new(manifest, core.iter().map(|k| k.to_string()).collect()).unwrap();

  Fixture {
    deployment,
    storage: Arc::new(TestStorage::default()),
    network: Arc::new(StubNetwork::default()),
    clients: Arc::new(ClientRegistry::new()),
  }
}
