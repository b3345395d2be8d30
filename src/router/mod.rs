//! Request router: classifies each intercepted request into a lane and
//! dispatches it to the matching handler.

mod api;
mod assets;

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheStore, PartitionManager};
use crate::config::Config;
use crate::http::{resolve_url, Request, Response};
use crate::net::Network;
use crate::queue::QueueStore;

/// Classification outcome for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
  /// Documentation/introspection: always live, never cached
  Bypass,
  /// Non-mutating API call: network first, API partition fallback
  ApiRead,
  /// Mutating API call: network, queue on failure
  ApiWrite,
  /// Document, script, style or image: cache first
  StaticAsset,
  /// Anything else: network, any cached copy as last resort
  Passthrough,
}

/// Path rules used for classification.
#[derive(Debug, Clone)]
pub struct Rules {
  pub api_prefix: String,
  pub bypass_prefixes: Vec<String>,
  /// Absolute URL of the shell document
  pub shell_url: String,
}

impl Rules {
  pub fn from_config(config: &Config) -> Result<Self> {
    Ok(Self {
      api_prefix: config.api_prefix.clone(),
      bypass_prefixes: config.bypass_prefixes.clone(),
      shell_url: resolve_url(&config.origin, &config.shell_document)?,
    })
  }

  /// Classify a request. Rules apply in priority order.
  pub fn classify(&self, request: &Request) -> Lane {
    let path = request.path();

    if self
      .bypass_prefixes
      .iter()
      .any(|prefix| has_path_prefix(&path, prefix))
    {
      return Lane::Bypass;
    }

    if has_path_prefix(&path, &self.api_prefix) {
      return if request.method.is_mutating() {
        Lane::ApiWrite
      } else {
        Lane::ApiRead
      };
    }

    if request.destination.is_static_asset() {
      return Lane::StaticAsset;
    }

    Lane::Passthrough
  }
}

/// Segment-aware prefix check: `/docs` matches `/docs` and `/docs/x`, not
/// `/docsx`.
fn has_path_prefix(path: &str, prefix: &str) -> bool {
  match path.strip_prefix(prefix.trim_end_matches('/')) {
    Some(rest) => rest.is_empty() || rest.starts_with('/'),
    None => false,
  }
}

/// Dispatcher over the network, the cache partitions and the durable queue.
pub struct Router<C: CacheStore, Q: QueueStore, N: Network> {
  network: Arc<N>,
  cache: PartitionManager<C>,
  queue: Arc<Q>,
  rules: Rules,
}

impl<C: CacheStore, Q: QueueStore, N: Network> Router<C, Q, N> {
  pub fn new(network: Arc<N>, cache: PartitionManager<C>, queue: Arc<Q>, rules: Rules) -> Self {
    Self {
      network,
      cache,
      queue,
      rules,
    }
  }

  #[cfg(test)]
  pub(crate) fn cache(&self) -> &PartitionManager<C> {
    &self.cache
  }

  /// Produce a response for an intercepted request.
  ///
  /// Network failures are absorbed by every lane except `Bypass` and
  /// `Passthrough` without a cached copy, where the error is returned.
  pub async fn handle(&self, request: &Request) -> Result<Response> {
    let lane = self.rules.classify(request);
    debug!(?lane, method = %request.method, url = %request.url, "intercepted request");

    match lane {
      Lane::Bypass => self.network.fetch(request).await,
      Lane::ApiRead => Ok(self.api_read(request).await),
      Lane::ApiWrite => Ok(self.api_write(request).await),
      Lane::StaticAsset => self.static_asset(request).await,
      Lane::Passthrough => self.passthrough(request).await,
    }
  }

  async fn passthrough(&self, request: &Request) -> Result<Response> {
    match self.network.fetch(request).await {
      Ok(response) => Ok(response),
      Err(e) => match self.cache.match_any(request) {
        Some(cached) => {
          warn!(error = %e, url = %request.url, "network failed, serving cached copy");
          Ok(cached)
        }
        None => Err(e),
      },
    }
  }
}

impl<C: CacheStore, Q: QueueStore, N: Network> Clone for Router<C, Q, N> {
  fn clone(&self) -> Self {
    Self {
      network: Arc::clone(&self.network),
      cache: self.cache.clone(),
      queue: Arc::clone(&self.queue),
      rules: self.rules.clone(),
    }
  }
}
