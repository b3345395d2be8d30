//! Queue store trait and SQLite implementation.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use crate::db;
use crate::http::{Headers, Method, Request};

/// A mutating request waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
  /// Auto-assigned, strictly increasing, never reused
  pub id: i64,
  pub url: String,
  pub method: Method,
  pub headers: Headers,
  pub body: Option<String>,
  /// Creation instant, epoch millis
  pub timestamp: i64,
}

impl PendingRequest {
  /// Rebuild the request exactly as it was first issued.
  pub fn to_request(&self) -> Request {
    Request {
      method: self.method.clone(),
      url: self.url.clone(),
      destination: Default::default(),
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }
}

/// Trait for durable queue backends.
///
/// Each operation is a single atomic transaction; callers do no locking of
/// their own.
pub trait QueueStore: Send + Sync + 'static {
  /// Persist a snapshot of `request`. Returns the assigned id.
  fn enqueue(&self, request: &Request) -> Result<i64>;

  /// Every pending request, ascending by id.
  fn list_all(&self) -> Result<Vec<PendingRequest>>;

  /// Remove a request after a confirmed replay. Returns whether it existed.
  fn delete_by_id(&self, id: i64) -> Result<bool>;
}

/// SQLite-based queue.
pub struct SqliteQueue {
  conn: Mutex<Connection>,
}

impl SqliteQueue {
  /// Open (or create) the queue database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    let conn = db::open(path, QUEUE_SCHEMA)?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

/// AUTOINCREMENT keeps ids from being reused after deletion.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body TEXT,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_requests_timestamp
    ON pending_requests(timestamp);
"#;

impl QueueStore for SqliteQueue {
  fn enqueue(&self, request: &Request) -> Result<i64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_string(&request.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT INTO pending_requests (url, method, headers, body, timestamp)
         VALUES (?, ?, ?, ?, ?)",
        params![
          request.url,
          request.method.as_str(),
          headers,
          request.body,
          Utc::now().timestamp_millis(),
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue {} {}: {}", request.method, request.url, e))?;

    Ok(conn.last_insert_rowid())
  }

  fn list_all(&self) -> Result<Vec<PendingRequest>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT id, url, method, headers, body, timestamp FROM pending_requests ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare queue listing: {}", e))?;

    let rows: Vec<(i64, String, String, String, Option<String>, i64)> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list pending requests: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read pending request: {}", e))?;

    rows
      .into_iter()
      .map(|(id, url, method, headers, body, timestamp)| {
        let headers: Headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers of request {}: {}", id, e))?;
        Ok(PendingRequest {
          id,
          url,
          method: Method::parse(&method),
          headers,
          body,
          timestamp,
        })
      })
      .collect()
  }

  fn delete_by_id(&self, id: i64) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let deleted = conn
      .execute("DELETE FROM pending_requests WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete pending request {}: {}", id, e))?;

    Ok(deleted > 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn delete_task(id: u32) -> Request {
    Request::new(Method::Delete, format!("http://h/api/tasks/{}", id))
      .with_header("Authorization", "Bearer t")
  }

  #[test]
  fn test_enqueue_list_delete() {
    let dir = tempfile::tempdir().unwrap();
    let queue = SqliteQueue::open(&dir.path().join("queue.db")).unwrap();

    let a = queue.enqueue(&delete_task(1)).unwrap();
    let b = queue
      .enqueue(&Request::new(Method::Post, "http://h/api/tasks").with_body(r#"{"t":1}"#))
      .unwrap();
    assert!(b > a);

    let all = queue.list_all().unwrap();
    assert_eq!(all.iter().map(|p| p.id).collect::<Vec<_>>(), vec![a, b]);
    assert_eq!(all[0].method, Method::Delete);
    assert_eq!(all[0].headers.get("authorization").map(String::as_str), Some("Bearer t"));
    assert_eq!(all[1].body.as_deref(), Some(r#"{"t":1}"#));

    assert!(queue.delete_by_id(a).unwrap());
    assert!(!queue.delete_by_id(a).unwrap());
    assert_eq!(queue.list_all().unwrap().len(), 1);
  }

  #[test]
  fn test_ids_not_reused_after_delete_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");

    let last = {
      let queue = SqliteQueue::open(&path).unwrap();
      let id = queue.enqueue(&delete_task(1)).unwrap();
      queue.delete_by_id(id).unwrap();
      id
    };

    let queue = SqliteQueue::open(&path).unwrap();
    assert!(queue.list_all().unwrap().is_empty());
    let next = queue.enqueue(&delete_task(2)).unwrap();
    assert!(next > last);
  }

  #[test]
  fn test_pending_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");
    SqliteQueue::open(&path)
      .unwrap()
      .enqueue(&delete_task(9))
      .unwrap();

    let all = SqliteQueue::open(&path).unwrap().list_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].to_request(), delete_task(9));
  }
}
