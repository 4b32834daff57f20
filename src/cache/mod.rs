//! Partitioned resource cache.
//!
//! This module provides the storage side of the offline cache:
//! - A capability trait over named partitions of key → response entries
//! - A persistent SQLite backend
//! - An in-memory backend for ephemeral runs

mod memory;
mod storage;
mod traits;

pub use memory::MemoryStorage;
pub use storage::SqliteStorage;
pub use traits::{CacheStorage, EntryInfo, Partition, CONTENT, MANIFEST_RECORD, PARTITIONS, STAGING};
