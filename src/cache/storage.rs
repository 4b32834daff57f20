//! SQLite implementation of cache storage.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{CacheStorage, EntryInfo};
use crate::net::Response;

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the storage database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shellcache").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named partitions
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Cached responses, keyed by normalized resource key
CREATE TABLE IF NOT EXISTS entries (
    partition TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, entry_key)
);
"#;

const UPSERT_ENTRY: &str = "INSERT OR REPLACE INTO entries (partition, entry_key, status, content_type, body, stored_at)
   VALUES (?, ?, ?, ?, ?, datetime('now'))";

impl CacheStorage for SqliteStorage {
  fn create_partition(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create partition {}: {}", name, e))?;
    Ok(())
  }

  fn has_partition(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM partitions WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query partition {}: {}", name, e))?;
    Ok(found.is_some())
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE partition = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let deleted = tx
      .execute("DELETE FROM partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted > 0)
  }

  fn lookup(&self, partition: &str, key: &str) -> Result<Option<Response>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT status, content_type, body FROM entries
         WHERE partition = ? AND entry_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    stmt
      .query_row(params![partition, key], |row| {
        Ok(Response {
          status: row.get(0)?,
          content_type: row.get(1)?,
          body: row.get(2)?,
        })
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key, partition, e))
  }

  fn put(&self, partition: &str, key: &str, response: &Response) -> Result<()> {
    self.put_all(partition, &[(key.to_string(), response.clone())])
  }

  fn put_all(&self, partition: &str, entries: &[(String, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to create partition {}: {}", partition, e))?;

    for (key, response) in entries {
      tx.execute(
        UPSERT_ENTRY,
        params![
          partition,
          key,
          response.status,
          response.content_type,
          response.body
        ],
      )
      .map_err(|e| eyre!("Failed to store {} in {}: {}", key, partition, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn remove(&self, partition: &str, key: &str) -> Result<bool> {
    let conn = self.lock()?;
    let deleted = conn
      .execute(
        "DELETE FROM entries WHERE partition = ? AND entry_key = ?",
        params![partition, key],
      )
      .map_err(|e| eyre!("Failed to delete {} from {}: {}", key, partition, e))?;
    Ok(deleted > 0)
  }

  fn keys(&self, partition: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT entry_key FROM entries WHERE partition = ? ORDER BY entry_key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![partition], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys of {}: {}", partition, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read keys of {}: {}", partition, e))?;

    Ok(keys)
  }

  fn entries(&self, partition: &str) -> Result<Vec<EntryInfo>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT entry_key, length(body), stored_at FROM entries
         WHERE partition = ? ORDER BY entry_key",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, i64, String)> = stmt
      .query_map(params![partition], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to list entries of {}: {}", partition, e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read entries of {}: {}", partition, e))?;

    rows
      .into_iter()
      .map(|(key, size, stored_at)| {
        Ok(EntryInfo {
          key,
          size: size.max(0) as usize,
          stored_at: parse_datetime(&stored_at)?,
        })
      })
      .collect()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::{CONTENT, STAGING};

  fn open_temp() -> (tempfile::TempDir, SqliteStorage) {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::open_at(&dir.path().join("cache.db")).unwrap();
    (dir, storage)
  }

  #[test]
  fn test_put_and_lookup() {
    let (_dir, storage) = open_temp();
    let response = Response::new(200, "console.log(1)").with_content_type("text/javascript");

    storage.put(CONTENT, "main.js", &response).unwrap();

    assert!(storage.has_partition(CONTENT).unwrap());
    assert_eq!(storage.lookup(CONTENT, "main.js").unwrap(), Some(response));
    assert_eq!(storage.lookup(CONTENT, "other.js").unwrap(), None);
    assert_eq!(storage.lookup(STAGING, "main.js").unwrap(), None);
  }

  #[test]
  fn test_delete_partition_drops_entries() {
    let (_dir, storage) = open_temp();
    storage.put(CONTENT, "a.js", &Response::new(200, "a")).unwrap();
    storage.put(STAGING, "a.js", &Response::new(200, "b")).unwrap();

    assert!(storage.delete_partition(CONTENT).unwrap());
    assert!(!storage.delete_partition(CONTENT).unwrap());

    assert!(!storage.has_partition(CONTENT).unwrap());
    assert!(storage.keys(CONTENT).unwrap().is_empty());
    assert_eq!(storage.keys(STAGING).unwrap(), vec!["a.js"]);
  }

  #[test]
  fn test_open_creates_empty_partition() {
    let (_dir, storage) = open_temp();
    let partition = storage.open(STAGING).unwrap();

    assert!(storage.has_partition(STAGING).unwrap());
    assert!(partition.keys().unwrap().is_empty());
  }

  #[test]
  fn test_entries_report_size() {
    let (_dir, storage) = open_temp();
    storage
      .put_all(
        CONTENT,
        &[
          ("b.js".to_string(), Response::new(200, "bb")),
          ("a.js".to_string(), Response::new(200, "a")),
        ],
      )
      .unwrap();

    let entries = storage.entries(CONTENT).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].key, "a.js");
    assert_eq!(entries[0].size, 1);
    assert_eq!(entries[1].size, 2);
  }

  #[test]
  fn test_failed_batch_stores_nothing() {
    let (_dir, storage) = open_temp();
    storage.put(CONTENT, "z.js", &Response::new(200, "z")).unwrap();
    storage
      .lock()
      .unwrap()
      .execute_batch(
        "CREATE TRIGGER reject_bad BEFORE INSERT ON entries
         WHEN NEW.entry_key = 'bad.js'
         BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
      )
      .unwrap();

    let result = storage.put_all(
      CONTENT,
      &[
        ("a.js".to_string(), Response::new(200, "a")),
        ("bad.js".to_string(), Response::new(200, "bad")),
        ("c.js".to_string(), Response::new(200, "c")),
      ],
    );
    assert!(result.is_err());
    assert_eq!(storage.keys(CONTENT).unwrap(), vec!["z.js"]);

    let result = storage.put_all(STAGING, &[("bad.js".to_string(), Response::new(200, "bad"))]);
    assert!(result.is_err());
    assert!(!storage.has_partition(STAGING).unwrap());
  }

  #[test]
  fn test_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let storage = SqliteStorage::open_at(&path).unwrap();
      storage.put(CONTENT, "/", &Response::new(200, "<html>")).unwrap();
    }

    let storage = SqliteStorage::open_at(&path).unwrap();
    assert!(storage.remove(CONTENT, "/").unwrap());
    assert!(!storage.remove(CONTENT, "/").unwrap());
  }
}
