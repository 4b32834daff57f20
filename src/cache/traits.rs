//! Core traits and types for the partitioned resource cache.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::net::Response;

/// Long-lived partition served to clients.
pub const CONTENT: &str = "content";
/// Transient partition holding shell files between install and activate.
pub const STAGING: &str = "staging";
/// Holds the single manifest snapshot of the last successful activation.
pub const MANIFEST_RECORD: &str = "manifest-record";

/// All partitions owned by the controller.
pub const PARTITIONS: [&str; 3] = [CONTENT, STAGING, MANIFEST_RECORD];

/// Metadata about a stored entry, without its body.
#[derive(Debug, Clone)]
pub struct EntryInfo {
  pub key: String,
  pub size: usize,
  pub stored_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Every operation is atomic on its own; callers do not get any ordering
/// guarantees between operations beyond program order.
pub trait CacheStorage: Send + Sync {
  /// Create the partition if it does not exist yet.
  fn create_partition(&self, name: &str) -> Result<()>;

  fn has_partition(&self, name: &str) -> Result<bool>;

  /// Delete a partition and all its entries. Returns whether it existed.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  /// Look up an entry by key.
  fn lookup(&self, partition: &str, key: &str) -> Result<Option<Response>>;

  /// Store an entry, replacing any existing one. Creates the partition.
  fn put(&self, partition: &str, key: &str, response: &Response) -> Result<()>;

  /// Store a batch of entries: either all of them land or none do.
  fn put_all(&self, partition: &str, entries: &[(String, Response)]) -> Result<()>;

  /// Remove an entry. Returns whether it existed.
  fn remove(&self, partition: &str, key: &str) -> Result<bool>;

  /// All keys in a partition, sorted. Empty if the partition doesn't exist.
  fn keys(&self, partition: &str) -> Result<Vec<String>>;

  /// Entry metadata for a partition, sorted by key.
  fn entries(&self, partition: &str) -> Result<Vec<EntryInfo>>;

  /// Open (creating if needed) a named partition.
  fn open(&self, name: &str) -> Result<Partition<'_, Self>>
  where
    Self: Sized,
  {
    self.create_partition(name)?;
    Ok(Partition {
      storage: self,
      name: name.to_string(),
    })
  }
}

/// Handle to one named partition of a storage backend.
pub struct Partition<'a, S: CacheStorage> {
  storage: &'a S,
  name: String,
}

impl<S: CacheStorage> Partition<'_, S> {
  pub fn lookup(&self, key: &str) -> Result<Option<Response>> {
    self.storage.lookup(&self.name, key)
  }

  pub fn put(&self, key: &str, response: &Response) -> Result<()> {
    self.storage.put(&self.name, key, response)
  }

  pub fn put_all(&self, entries: &[(String, Response)]) -> Result<()> {
    self.storage.put_all(&self.name, entries)
  }

  pub fn remove(&self, key: &str) -> Result<bool> {
    self.storage.remove(&self.name, key)
  }

  pub fn keys(&self) -> Result<Vec<String>> {
    self.storage.keys(&self.name)
  }
}
