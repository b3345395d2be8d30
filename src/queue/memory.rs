//! In-process queue. Pending requests are lost on restart.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::store::{PendingRequest, QueueStore};
use crate::http::Request;

#[derive(Default)]
pub struct MemoryQueue {
  inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
  next_id: i64,
  entries: BTreeMap<i64, PendingRequest>,
}

impl MemoryQueue {
  pub fn new() -> Self {
    Self::default()
  }
}

impl QueueStore for MemoryQueue {
  fn enqueue(&self, request: &Request) -> Result<i64> {
    let mut inner = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    inner.next_id += 1;
    let id = inner.next_id;
    inner.entries.insert(
      id,
      PendingRequest {
        id,
        url: request.url.clone(),
        method: request.method.clone(),
        headers: request.headers.clone(),
        body: request.body.clone(),
        timestamp: Utc::now().timestamp_millis(),
      },
    );
    Ok(id)
  }

  fn list_all(&self) -> Result<Vec<PendingRequest>> {
    let inner = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.entries.values().cloned().collect())
  }

  fn delete_by_id(&self, id: i64) -> Result<bool> {
    let mut inner = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.entries.remove(&id).is_some())
  }
}

/// Queue whose every operation fails, as with storage disabled.
#[cfg(test)]
pub struct FailingQueue;

#[cfg(test)]
impl QueueStore for FailingQueue {
  fn enqueue(&self, request: &Request) -> Result<i64> {
    Err(eyre!("Queue storage is disabled, dropping {}", request.url))
  }

  fn list_all(&self) -> Result<Vec<PendingRequest>> {
    Err(eyre!("Queue storage is disabled"))
  }

  fn delete_by_id(&self, _id: i64) -> Result<bool> {
    Err(eyre!("Queue storage is disabled"))
  }
}
