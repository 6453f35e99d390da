//! Cache storage trait and SQLite implementation.
//!
//! Entries live in named partitions. Partition names carry the cache
//! generation (e.g. `flagwatch-dynamic-v1.0.0`) so that activating a new
//! generation can enumerate and drop everything older.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// A single stored cache entry.
#[derive(Debug, Clone)]
pub struct StoredEntry {
  pub payload: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

impl StoredEntry {
  /// Age of the entry relative to now.
  pub fn age(&self) -> chrono::Duration {
    Utc::now() - self.stored_at
  }
}

/// Trait for cache storage backends.
pub trait CacheStore: Send + Sync {
  /// Store an entry with an explicit retrieval timestamp.
  fn put_at(
    &self,
    partition: &str,
    key: &str,
    payload: &[u8],
    stored_at: DateTime<Utc>,
  ) -> Result<()>;

  /// Store an entry stamped with the current time, replacing any prior
  /// entry for the same key.
  fn put(&self, partition: &str, key: &str, payload: &[u8]) -> Result<()> {
    self.put_at(partition, key, payload, Utc::now())
  }

  /// Look up an entry.
  fn get(&self, partition: &str, key: &str) -> Result<Option<StoredEntry>>;

  /// Delete a single entry.
  fn delete(&self, partition: &str, key: &str) -> Result<()>;

  /// All partition names currently present.
  fn partitions(&self) -> Result<Vec<String>>;

  /// Drop a whole partition.
  fn drop_partition(&self, partition: &str) -> Result<()>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStore;

impl CacheStore for NoopStore {
  fn put_at(&self, _: &str, _: &str, _: &[u8], _: DateTime<Utc>) -> Result<()> {
    Ok(()) // Discard
  }

  fn get(&self, _: &str, _: &str) -> Result<Option<StoredEntry>> {
    Ok(None) // Always miss
  }

  fn delete(&self, _: &str, _: &str) -> Result<()> {
    Ok(())
  }

  fn partitions(&self) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  fn drop_partition(&self, _: &str) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based cache storage.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the cache database at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    Self::open_at(&path)
  }

  /// Open or create the cache database at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;
    Self::from_connection(conn)
  }

  /// In-memory store for tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("flagwatch").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    partition TEXT NOT NULL,
    key TEXT NOT NULL,
    payload BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (partition, key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_partition
    ON cache_entries(partition);
"#;

impl CacheStore for SqliteStore {
  fn put_at(
    &self,
    partition: &str,
    key: &str,
    payload: &[u8],
    stored_at: DateTime<Utc>,
  ) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (partition, key, payload, stored_at)
         VALUES (?, ?, ?, ?)",
        params![partition, key, payload, stored_at.to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn get(&self, partition: &str, key: &str) -> Result<Option<StoredEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT payload, stored_at FROM cache_entries WHERE partition = ? AND key = ?")
      .map_err(|e| eyre!("Failed to prepare cache lookup: {}", e))?;

    let row: Option<(Vec<u8>, String)> = stmt
      .query_row(params![partition, key], |row| {
        Ok((row.get(0)?, row.get(1)?))
      })
      .ok();

    match row {
      Some((payload, stored_at)) => {
        let stored_at = DateTime::parse_from_rfc3339(&stored_at)
          .map_err(|e| eyre!("Failed to parse stored_at '{}': {}", stored_at, e))?
          .with_timezone(&Utc);
        Ok(Some(StoredEntry { payload, stored_at }))
      }
      None => Ok(None),
    }
  }

  fn delete(&self, partition: &str, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM cache_entries WHERE partition = ? AND key = ?",
        params![partition, key],
      )
      .map_err(|e| eyre!("Failed to delete cache entry: {}", e))?;

    Ok(())
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT partition FROM cache_entries")
      .map_err(|e| eyre!("Failed to prepare partition listing: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn drop_partition(&self, partition: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM cache_entries WHERE partition = ?",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to drop partition: {}", e))?;

    Ok(())
  }
}
