//! Static-asset lane: cache first, network second, shell document for
//! navigations that cannot be served.

use color_eyre::Result;
use tracing::{debug, warn};

use super::Router;
use crate::cache::CacheStore;
use crate::http::{Destination, Request, Response};
use crate::net::Network;
use crate::queue::QueueStore;

impl<C: CacheStore, Q: QueueStore, N: Network> Router<C, Q, N> {
  pub(super) async fn static_asset(&self, request: &Request) -> Result<Response> {
    if let Some(cached) = self.cache.match_static(&request.url) {
      debug!(url = %request.url, "static cache hit");
      return Ok(cached);
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          self.cache.put_static(request, &response);
        }
        Ok(response)
      }
      Err(e) if request.destination == Destination::Document => {
        match self.cache.match_static(&self.rules.shell_url) {
          Some(shell) => {
            debug!(url = %request.url, "offline navigation, serving shell document");
            Ok(shell)
          }
          None => {
            warn!(url = %request.url, "offline navigation and no shell document cached");
            Err(e)
          }
        }
      }
      Err(e) => Err(e),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::super::tests::{router, rules};
  use super::super::Router;
  use crate::cache::{FailingStorage, PartitionManager};
  use crate::http::{Destination, Method, Request, Response};
  use crate::net::fake::FakeNetwork;
  use crate::queue::MemoryQueue;

  #[tokio::test]
  async fn test_cache_first() {
    let (router, network) = router();
    let req = Request::get("http://h/assets/app.js").with_destination(Destination::Script);
    network.route(Method::Get, &req.url, Response::new(200, "v1"));

    assert_eq!(router.handle(&req).await.unwrap().body, b"v1");

    // A newer network copy is not consulted once cached.
    network.route(Method::Get, &req.url, Response::new(200, "v2"));
    assert_eq!(router.handle(&req).await.unwrap().body, b"v1");
    assert_eq!(network.requests().len(), 1);
  }

  #[tokio::test]
  async fn test_unknown_route_falls_back_to_shell() {
    let (router, network) = router();
    router.cache.put_static(
      &Request::get("http://h/index.html"),
      &Response::new(200, "<shell>"),
    );
    network.set_offline(true);

    let nav = Request::get("http://h/projects/42/board").with_destination(Destination::Document);
    assert_eq!(router.handle(&nav).await.unwrap().body, b"<shell>");
  }

  #[tokio::test]
  async fn test_offline_image_miss_propagates() {
    let (router, network) = router();
    router.cache.put_static(
      &Request::get("http://h/index.html"),
      &Response::new(200, "<shell>"),
    );
    network.set_offline(true);

    let img = Request::get("http://h/avatar.png").with_destination(Destination::Image);
    assert!(router.handle(&img).await.is_err());
  }

  #[tokio::test]
  async fn test_error_status_not_cached() {
    let (router, _network) = router();
    let req = Request::get("http://h/missing.css").with_destination(Destination::Style);

    assert_eq!(router.handle(&req).await.unwrap().status, 404);
    assert!(router.cache.match_static(&req.url).is_none());
  }

  #[tokio::test]
  async fn test_asset_stored_from_get_serves_other_methods() {
    let (router, network) = router();
    let get = Request::get("http://h/logo.png").with_destination(Destination::Image);
    network.route(Method::Get, &get.url, Response::new(200, vec![0x89, b'P', 0xff]));
    router.handle(&get).await.unwrap();

    network.set_offline(true);
    let head = Request::new(Method::Head, "http://h/logo.png").with_destination(Destination::Image);
    assert_eq!(router.handle(&head).await.unwrap().body, vec![0x89, b'P', 0xff]);
  }

  #[tokio::test]
  async fn test_broken_cache_still_serves_from_network() {
    let network = FakeNetwork::new();
    let router = Router::new(
      Arc::new(network.clone()),
      PartitionManager::new(FailingStorage::new(), "v1", "/api/"),
      Arc::new(MemoryQueue::new()),
      rules(),
    );
    let req = Request::get("http://h/assets/app.js").with_destination(Destination::Script);
    network.route(Method::Get, &req.url, Response::new(200, "js"));

    assert_eq!(router.handle(&req).await.unwrap().body, b"js");
    assert_eq!(router.handle(&req).await.unwrap().body, b"js");
    assert_eq!(network.requests().len(), 2);
  }
}
