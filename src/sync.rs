//! Background replay of queued mutations.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::net::Network;
use crate::queue::{PendingRequest, QueueStore};

/// Outcome of one sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
  /// Size of the batch when the pass started. This, not `delivered`, is
  /// what pages are told.
  pub synced_count: usize,
  /// Entries confirmed and removed during the pass
  pub delivered: usize,
}

/// Drains the durable queue when a sync trigger arrives.
pub struct SyncOrchestrator<Q: QueueStore, N: Network> {
  queue: Arc<Q>,
  network: Arc<N>,
  tag: String,
}

impl<Q: QueueStore, N: Network> SyncOrchestrator<Q, N> {
  pub fn new(queue: Arc<Q>, network: Arc<N>, tag: &str) -> Self {
    Self {
      queue,
      network,
      tag: tag.to_string(),
    }
  }

  pub fn pending(&self) -> Result<Vec<PendingRequest>> {
    self.queue.list_all()
  }

  /// Replay every pending request in id order. Returns `None` for triggers
  /// carrying another tag.
  ///
  /// Entries are deleted only after an ok response; anything else stays for
  /// the next trigger. Entries enqueued while the pass runs are left for a
  /// later pass.
  pub async fn on_sync(&self, tag: &str) -> Result<Option<SyncReport>> {
    if tag != self.tag {
      debug!(tag, "ignoring sync trigger for another tag");
      return Ok(None);
    }

    let batch = self.queue.list_all()?;
    info!(pending = batch.len(), "starting sync pass");

    let mut delivered = 0;
    for pending in &batch {
      if self.replay(pending).await {
        delivered += 1;
      }
    }

    info!(
      pending = batch.len(),
      delivered, "sync pass complete"
    );

    Ok(Some(SyncReport {
      synced_count: batch.len(),
      delivered,
    }))
  }

  async fn replay(&self, pending: &PendingRequest) -> bool {
    let response = match self.network.fetch(&pending.to_request()).await {
      Ok(response) => response,
      Err(e) => {
        warn!(id = pending.id, error = %e, "replay failed, keeping request");
        return false;
      }
    };

    if !response.ok() {
      warn!(id = pending.id, status = response.status, "replay rejected, keeping request");
      return false;
    }

    match self.queue.delete_by_id(pending.id) {
      Ok(_) => {
        debug!(id = pending.id, url = %pending.url, "replayed request");
        true
      }
      Err(e) => {
        // Delivered but not removed: it will be sent again.
        warn!(id = pending.id, error = %e, "failed to remove replayed request");
        false
      }
    }
  }
}
