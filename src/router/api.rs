//! API lanes: network-first reads with a cached fallback, and writes that
//! are queued for replay when the network is unreachable.

use tracing::{debug, error, info, warn};

use super::Router;
use crate::cache::CacheStore;
use crate::http::{Request, Response};
use crate::net::Network;
use crate::queue::QueueStore;

const READ_OFFLINE_MESSAGE: &str = "You are offline and this data has not been cached yet.";
const WRITE_QUEUED_MESSAGE: &str =
  "You are offline. The request was saved and will be sent when the connection returns.";
const WRITE_LOST_MESSAGE: &str = "You are offline and the request could not be saved.";

impl<C: CacheStore, Q: QueueStore, N: Network> Router<C, Q, N> {
  /// Network first. Successful responses are copied into the API partition;
  /// network failures fall back to that copy, then to a 503.
  pub(super) async fn api_read(&self, request: &Request) -> Response {
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          self.cache.put_api(request, &response);
        }
        response
      }
      Err(e) => match self.cache.match_api(request) {
        Some(cached) => {
          debug!(error = %e, url = %request.url, "offline, serving cached api response");
          cached
        }
        None => {
          warn!(error = %e, url = %request.url, "offline with no cached api response");
          Response::offline(READ_OFFLINE_MESSAGE, None)
        }
      },
    }
  }

  /// Network only. Success invalidates the resource family; failure queues
  /// the request for replay.
  pub(super) async fn api_write(&self, request: &Request) -> Response {
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          self.cache.invalidate_family_of(&request.url);
        }
        response
      }
      Err(e) => {
        warn!(error = %e, method = %request.method, url = %request.url, "mutation failed at network");
        let stored = self.store_for_replay(request);
        let message = if stored {
          WRITE_QUEUED_MESSAGE
        } else {
          WRITE_LOST_MESSAGE
        };
        Response::offline(message, Some(stored))
      }
    }
  }

  fn store_for_replay(&self, request: &Request) -> bool {
    if !request.method.is_mutating() {
      return false;
    }
    match self.queue.enqueue(request) {
      Ok(id) => {
        info!(id, method = %request.method, url = %request.url, "queued request for replay");
        true
      }
      Err(e) => {
        error!(error = %e, method = %request.method, url = %request.url, "could not queue request, it will not be replayed");
        false
      }
    }
  }
}
