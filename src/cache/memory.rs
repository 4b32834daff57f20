//! In-process cache storage, used when persistence is disabled.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheStorage, EntryInfo};
use crate::net::Response;

type Partitions = HashMap<String, BTreeMap<String, (Response, DateTime<Utc>)>>;

/// Storage that keeps every partition in memory for the lifetime of the
/// process.
#[derive(Default)]
pub struct MemoryStorage {
  partitions: Mutex<Partitions>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, Partitions>> {
    self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for MemoryStorage {
  fn create_partition(&self, name: &str) -> Result<()> {
    self.lock()?.entry(name.to_string()).or_default();
    Ok(())
  }

  fn has_partition(&self, name: &str) -> Result<bool> {
    Ok(self.lock()?.contains_key(name))
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    Ok(self.lock()?.remove(name).is_some())
  }

  fn lookup(&self, partition: &str, key: &str) -> Result<Option<Response>> {
    Ok(
      self
        .lock()?
        .get(partition)
        .and_then(|entries| entries.get(key))
        .map(|(response, _)| response.clone()),
    )
  }

  fn put(&self, partition: &str, key: &str, response: &Response) -> Result<()> {
    self
      .lock()?
      .entry(partition.to_string())
      .or_default()
      .insert(key.to_string(), (response.clone(), Utc::now()));
    Ok(())
  }

  fn put_all(&self, partition: &str, entries: &[(String, Response)]) -> Result<()> {
    let mut partitions = self.lock()?;
    let target = partitions.entry(partition.to_string()).or_default();
    let now = Utc::now();
    for (key, response) in entries {
      target.insert(key.clone(), (response.clone(), now));
    }
    Ok(())
  }

  fn remove(&self, partition: &str, key: &str) -> Result<bool> {
    Ok(
      self
        .lock()?
        .get_mut(partition)
        .is_some_and(|entries| entries.remove(key).is_some()),
    )
  }

  fn keys(&self, partition: &str) -> Result<Vec<String>> {
    Ok(
      self
        .lock()?
        .get(partition)
        .map(|entries| entries.keys().cloned().collect())
        .unwrap_or_default(),
    )
  }

  fn entries(&self, partition: &str) -> Result<Vec<EntryInfo>> {
    Ok(
      self
        .lock()?
        .get(partition)
        .map(|entries| {
          entries
            .iter()
            .map(|(key, (response, stored_at))| EntryInfo {
              key: key.clone(),
              size: response.body.len(),
              stored_at: *stored_at,
            })
            .collect()
        })
        .unwrap_or_default(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::CONTENT;

  #[test]
  fn test_remove_and_delete() {
    let storage = MemoryStorage::new();
    storage.put(CONTENT, "a.js", &Response::new(200, "a")).unwrap();

    assert!(storage.remove(CONTENT, "a.js").unwrap());
    assert!(!storage.remove(CONTENT, "a.js").unwrap());
    assert!(!storage.remove("missing", "a.js").unwrap());

    assert!(storage.has_partition(CONTENT).unwrap());
    assert!(storage.delete_partition(CONTENT).unwrap());
    assert!(!storage.has_partition(CONTENT).unwrap());
  }

  #[test]
  fn test_keys_are_sorted() {
    let storage = MemoryStorage::new();
    for key in ["c.js", "/", "a.js"] {
      storage.put(CONTENT, key, &Response::new(200, key)).unwrap();
    }
    assert_eq!(storage.keys(CONTENT).unwrap(), vec!["/", "a.js", "c.js"]);
  }
}
