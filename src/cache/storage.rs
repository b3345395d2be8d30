//! SQLite-backed cache partitions.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::traits::{CacheKey, CacheStore, CachedResponse, StoredKey};
use crate::db;
use crate::http::{Headers, Method, Response};

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    let conn = db::open(path, CACHE_SCHEMA)?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cache_entries (
    partition TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT,
    url TEXT NOT NULL,
    family TEXT,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (partition, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_family
    ON cache_entries(partition, family);

CREATE TABLE IF NOT EXISTS cache_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const ACTIVE_VERSION_KEY: &str = "active_version";

impl CacheStore for SqliteStorage {
  fn open(&self, partition: &str) -> Result<()> {
    let conn = self.conn()?;
    ensure_partition(&conn, partition)
  }

  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare(
        "SELECT family, status, status_text, headers, body, cached_at FROM cache_entries
         WHERE partition = ? AND key_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(Option<String>, u16, String, String, Vec<u8>, String)> = stmt
      .query_row(params![partition, key.cache_hash()], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key.url, e))?;

    let Some((family, status, status_text, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let headers: Headers = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;

    Ok(Some(CachedResponse {
      key: key.clone(),
      response: Response {
        status,
        status_text,
        headers,
        body,
      },
      family,
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, partition: &str, entry: &CachedResponse) -> Result<()> {
    let conn = self.conn()?;
    ensure_partition(&conn, partition)?;

    let headers = serde_json::to_string(&entry.response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries
           (partition, key_hash, method, url, family, status, status_text, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          partition,
          entry.key.cache_hash(),
          entry.key.method.as_ref().map(Method::as_str),
          entry.key.url,
          entry.family,
          entry.response.status,
          entry.response.status_text,
          headers,
          entry.response.body,
          entry.cached_at.to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry {}: {}", entry.key.url, e))?;

    Ok(())
  }

  fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool> {
    let conn = self.conn()?;

    let deleted = conn
      .execute(
        "DELETE FROM cache_entries WHERE partition = ? AND key_hash = ?",
        params![partition, key.cache_hash()],
      )
      .map_err(|e| eyre!("Failed to delete cache entry {}: {}", key.url, e))?;

    Ok(deleted > 0)
  }

  fn list_keys(&self, partition: &str) -> Result<Vec<StoredKey>> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare("SELECT method, url, family FROM cache_entries WHERE partition = ? ORDER BY url")
      .map_err(|e| eyre!("Failed to prepare key listing: {}", e))?;

    let keys = stmt
      .query_map(params![partition], |row| {
        let method: Option<String> = row.get(0)?;
        Ok(StoredKey {
          key: CacheKey {
            method: method.as_deref().map(Method::parse),
            url: row.get(1)?,
          },
          family: row.get(2)?,
        })
      })
      .map_err(|e| eyre!("Failed to list cache keys: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read cache key: {}", e))?;

    Ok(keys)
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_partitions ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare partition listing: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn delete_partition(&self, partition: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE partition = ?",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", partition, e))?;
    let deleted = tx
      .execute(
        "DELETE FROM cache_partitions WHERE name = ?",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to delete partition {}: {}", partition, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted > 0)
  }

  fn active_version(&self) -> Result<Option<String>> {
    let conn = self.conn()?;

    conn
      .query_row(
        "SELECT value FROM cache_meta WHERE key = ?",
        params![ACTIVE_VERSION_KEY],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read active version: {}", e))
  }

  fn set_active_version(&self, version: &str) -> Result<()> {
    let conn = self.conn()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_meta (key, value) VALUES (?, ?)",
        params![ACTIVE_VERSION_KEY, version],
      )
      .map_err(|e| eyre!("Failed to record active version {}: {}", version, e))?;

    Ok(())
  }
}

fn ensure_partition(conn: &Connection, partition: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_partitions (name, created_at) VALUES (?, ?)",
      params![partition, Utc::now().to_rfc3339()],
    )
    .map_err(|e| eyre!("Failed to open partition {}: {}", partition, e))?;
  Ok(())
}

/// Parse an RFC 3339 timestamp written by this module.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
