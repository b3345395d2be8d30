//! Installation, activation and takeover of the agent.
//!
//! ```text
//! Parsed -> Installing -> Installed (waiting) -> Activating -> Active
//!               \
//!                -> Redundant (install failed)
//! ```
//!
//! `skip_waiting` lets an installed instance activate without waiting for
//! the previous generation's pages to close.
//!
//! Activation records the version in the cache store. A later process with
//! the same version and both live partitions intact starts out `Active`.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use crate::cache::{CacheStore, PartitionManager};
use crate::clients::Clients;
use crate::http::{resolve_url, Request, Response};
use crate::net::Network;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
  Parsed,
  Installing,
  /// Installed and waiting to activate
  Installed,
  Activating,
  Active,
  Redundant,
}

/// What activation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
  /// Stale partitions removed
  pub purged: Vec<String>,
  /// Pages taken over from a previous generation
  pub claimed: usize,
  /// Requests still in flight at claim time. They finish under the handler
  /// that started them while new requests see this generation.
  pub overlap: usize,
}

pub struct LifecycleManager<C: CacheStore, N: Network> {
  state: Mutex<LifecycleState>,
  skip_waiting: AtomicBool,
  cache: PartitionManager<C>,
  network: Arc<N>,
  /// Absolute URLs of the install manifest
  manifest: Vec<String>,
}

impl<C: CacheStore, N: Network> LifecycleManager<C, N> {
  pub fn new(
    cache: PartitionManager<C>,
    network: Arc<N>,
    origin: &str,
    precache: &[String],
    skip_waiting: bool,
  ) -> Result<Self> {
    let manifest = precache
      .iter()
      .map(|path| resolve_url(origin, path))
      .collect::<Result<Vec<_>>>()?;

    let state = if cache.was_active() {
      info!(version = cache.version(), "resuming as the active agent");
      LifecycleState::Active
    } else {
      LifecycleState::Parsed
    };

    Ok(Self {
      state: Mutex::new(state),
      skip_waiting: AtomicBool::new(skip_waiting),
      cache,
      network,
      manifest,
    })
  }

  pub fn state(&self) -> LifecycleState {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn skips_waiting(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  /// Request immediate takeover once installed.
  pub fn skip_waiting(&self) {
    self.skip_waiting.store(true, Ordering::SeqCst);
  }

  fn transition(&self, from: &[LifecycleState], to: LifecycleState) -> Result<()> {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    if !from.contains(&state) {
      return Err(eyre!("Cannot move from {:?} to {:?}", *state, to));
    }
    info!(from = ?*state, to = ?to, "lifecycle transition");
    *state = to;
    Ok(())
  }

  /// Fetch every manifest resource and store them in the static partition.
  ///
  /// All-or-nothing: if any resource fails to fetch or is not ok, nothing is
  /// stored and the instance becomes redundant.
  pub async fn install(&self) -> Result<()> {
    self.transition(
      &[LifecycleState::Parsed, LifecycleState::Redundant],
      LifecycleState::Installing,
    )?;

    match self.fetch_manifest().await {
      Ok(resources) => match self.cache.precache(&resources) {
        Ok(()) => {
          info!(count = resources.len(), "precached install manifest");
          self.transition(&[LifecycleState::Installing], LifecycleState::Installed)
        }
        Err(e) => {
          error!(error = %e, "install failed: could not store manifest");
          self.transition(&[LifecycleState::Installing], LifecycleState::Redundant)?;
          Err(e)
        }
      },
      Err(e) => {
        error!(error = %e, "install failed: could not fetch manifest");
        self.transition(&[LifecycleState::Installing], LifecycleState::Redundant)?;
        Err(e)
      }
    }
  }

  async fn fetch_manifest(&self) -> Result<Vec<(Request, Response)>> {
    try_join_all(self.manifest.iter().map(|url| async move {
      let request = Request::get(url.as_str());
      let response = self.network.fetch(&request).await?;
      if !response.ok() {
        return Err(eyre!("{} returned status {}", url, response.status));
      }
      Ok::<_, color_eyre::Report>((request, response))
    }))
    .await
  }

  /// Purge stale partitions and claim every open page.
  pub fn activate(&self, clients: &Clients, in_flight: &AtomicUsize) -> Result<Activation> {
    self.transition(&[LifecycleState::Installed], LifecycleState::Activating)?;

    let purged = match self.cache.purge_stale() {
      Ok(purged) => purged,
      Err(e) => {
        // Stale partitions are retried on the next activation.
        error!(error = %e, "failed to purge stale partitions");
        Vec::new()
      }
    };

    self.transition(&[LifecycleState::Activating], LifecycleState::Active)?;
    if let Err(e) = self.cache.mark_active() {
      warn!(error = %e, "could not record the active version, next start will reinstall");
    }

    let overlap = in_flight.load(Ordering::SeqCst);
    let claimed = clients.claim();
    info!(
      purged = purged.len(),
      claimed, overlap, "activated and claimed open pages"
    );

    Ok(Activation {
      purged,
      claimed,
      overlap,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, SqliteStorage};
  use crate::http::Method;
  use crate::net::fake::FakeNetwork;

  const MANIFEST: [&str; 3] = ["/index.html", "/favicon.svg", "/manifest.json"];

  fn manager(network: &FakeNetwork) -> LifecycleManager<MemoryStorage, FakeNetwork> {
    let cache = PartitionManager::new(MemoryStorage::new(), "v3", "/api/");
    let precache: Vec<String> = MANIFEST.iter().map(|s| s.to_string()).collect();
    LifecycleManager::new(cache, Arc::new(network.clone()), "http://h", &precache, false).unwrap()
  }

  fn serve_manifest(network: &FakeNetwork) {
    for path in MANIFEST {
      network.route(
        Method::Get,
        &format!("http://h{}", path),
        Response::new(200, path),
      );
    }
  }

  #[tokio::test]
  async fn test_install_precaches_manifest() {
    let network = FakeNetwork::new();
    serve_manifest(&network);
    let lifecycle = manager(&network);

    lifecycle.install().await.unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Installed);
    for path in MANIFEST {
      let cached = lifecycle.cache.match_static(&format!("http://h{}", path));
      assert_eq!(cached.unwrap().body, path.as_bytes());
    }
  }

  #[tokio::test]
  async fn test_install_is_atomic() {
    let network = FakeNetwork::new();
    serve_manifest(&network);
    network.fail_url("http://h/manifest.json");
    let lifecycle = manager(&network);

    assert!(lifecycle.install().await.is_err());
    assert_eq!(lifecycle.state(), LifecycleState::Redundant);
    assert!(lifecycle.cache.match_static("http://h/index.html").is_none());
  }

  #[tokio::test]
  async fn test_install_rejects_error_status() {
    let network = FakeNetwork::new();
    network.route(Method::Get, "http://h/index.html", Response::new(200, "x"));
    let lifecycle = manager(&network);

    assert!(lifecycle.install().await.is_err());
    assert_eq!(lifecycle.state(), LifecycleState::Redundant);
  }

  #[tokio::test]
  async fn test_activate_requires_install() {
    let network = FakeNetwork::new();
    let lifecycle = manager(&network);
    let clients = Clients::new();

    assert!(lifecycle.activate(&clients, &AtomicUsize::new(0)).is_err());
    assert_eq!(lifecycle.state(), LifecycleState::Parsed);
  }

  #[tokio::test]
  async fn test_activate_purges_claims_and_reports_overlap() {
    let network = FakeNetwork::new();
    serve_manifest(&network);
    let lifecycle = manager(&network);
    lifecycle.cache.store().open("taskflow-static-v2").unwrap();
    lifecycle.cache.store().open("taskflow-api-v2").unwrap();

    let clients = Clients::new();
    clients.connect("old", "http://h/", false);

    lifecycle.install().await.unwrap();
    let activation = lifecycle.activate(&clients, &AtomicUsize::new(2)).unwrap();

    assert_eq!(lifecycle.state(), LifecycleState::Active);
    assert_eq!(activation.claimed, 1);
    assert_eq!(activation.overlap, 2);
    assert_eq!(activation.purged.len(), 2);
    assert!(lifecycle.cache.match_static("http://h/index.html").is_some());
    assert_eq!(clients.controlled().len(), 1);
  }

  #[tokio::test]
  async fn test_activated_version_resumes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let network = FakeNetwork::new();
    serve_manifest(&network);
    let precache: Vec<String> = MANIFEST.iter().map(|s| s.to_string()).collect();
    let open = |version: &str| {
      let cache = PartitionManager::new(SqliteStorage::open(&path).unwrap(), version, "/api/");
      LifecycleManager::new(cache, Arc::new(network.clone()), "http://h", &precache, false)
        .unwrap()
    };

    {
      let lifecycle = open("v3");
      lifecycle.install().await.unwrap();
      lifecycle.activate(&Clients::new(), &AtomicUsize::new(0)).unwrap();
    }

    assert_eq!(open("v3").state(), LifecycleState::Active);
    assert_eq!(open("v4").state(), LifecycleState::Parsed);
  }
}
