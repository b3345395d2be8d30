//! Partition manager that owns the live static and API partitions.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::traits::{CacheKey, CacheStore, CachedResponse};
use crate::http::{request_path, Method, Request, Response};

const PARTITION_PREFIX: &str = "taskflow";

/// Names of the two live partitions for a given version token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
  pub static_assets: String,
  pub api: String,
}

impl PartitionNames {
  pub fn for_version(version: &str) -> Self {
    Self {
      static_assets: format!("{}-static-{}", PARTITION_PREFIX, version),
      api: format!("{}-api-{}", PARTITION_PREFIX, version),
    }
  }

  pub fn is_live(&self, name: &str) -> bool {
    name == self.static_assets || name == self.api
  }
}

/// Owns both partitions and applies their population and eviction policies.
///
/// Storage failures on the request path are logged and treated as a miss,
/// so a broken cache degrades to network-only behavior.
pub struct PartitionManager<C: CacheStore> {
  store: Arc<C>,
  version: String,
  names: PartitionNames,
  api_prefix: String,
}

impl<C: CacheStore> PartitionManager<C> {
  pub fn new(store: C, version: &str, api_prefix: &str) -> Self {
    Self {
      store: Arc::new(store),
      version: version.to_string(),
      names: PartitionNames::for_version(version),
      api_prefix: api_prefix.to_string(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn names(&self) -> &PartitionNames {
    &self.names
  }

  /// Direct access to the backing store.
  pub fn store(&self) -> &C {
    &self.store
  }

  /// Cached static asset for `url`, regardless of method.
  pub fn match_static(&self, url: &str) -> Option<Response> {
    self.lookup(&self.names.static_assets, &CacheKey::for_url(url))
  }

  /// Store a static asset. Only GET responses are kept.
  pub fn put_static(&self, request: &Request, response: &Response) {
    if request.method != Method::Get {
      return;
    }
    let entry = CachedResponse::new(CacheKey::for_url(&request.url), response.clone(), None);
    self.write(&self.names.static_assets, &entry);
  }

  /// Cached API response for the exact method and URL.
  pub fn match_api(&self, request: &Request) -> Option<Response> {
    self.lookup(&self.names.api, &CacheKey::for_request(request))
  }

  /// Store an API response, tagged with its resource family.
  pub fn put_api(&self, request: &Request, response: &Response) {
    let family = resource_family(&request.path(), &self.api_prefix);
    let entry = CachedResponse::new(CacheKey::for_request(request), response.clone(), family);
    self.write(&self.names.api, &entry);
  }

  /// Any cached response for the request, searching both partitions.
  pub fn match_any(&self, request: &Request) -> Option<Response> {
    self
      .match_static(&request.url)
      .or_else(|| self.match_api(request))
  }

  /// Drop every API entry tagged with the family of `url`. Returns the number
  /// of entries removed.
  pub fn invalidate_family_of(&self, url: &str) -> usize {
    let Some(family) = resource_family(&request_path(url), &self.api_prefix) else {
      return 0;
    };

    let keys = match self.store.list_keys(&self.names.api) {
      Ok(keys) => keys,
      Err(e) => {
        warn!(error = %e, family = %family, "cache unavailable, skipping invalidation");
        return 0;
      }
    };

    let mut removed = 0;
    for stored in keys
      .into_iter()
      .filter(|k| k.family.as_deref() == Some(family.as_str()))
    {
      match self.store.delete(&self.names.api, &stored.key) {
        Ok(true) => removed += 1,
        Ok(false) => {}
        Err(e) => warn!(error = %e, url = %stored.key.url, "failed to invalidate cache entry"),
      }
    }

    debug!(family = %family, removed, "invalidated api cache family");
    removed
  }

  /// Populate the static partition. Fails on the first storage error.
  pub fn precache(&self, resources: &[(Request, Response)]) -> Result<()> {
    self.store.open(&self.names.static_assets)?;
    for (request, response) in resources {
      let entry = CachedResponse::new(CacheKey::for_url(&request.url), response.clone(), None);
      self.store.put(&self.names.static_assets, &entry)?;
    }
    Ok(())
  }

  /// Delete every partition that is not one of the two live names.
  ///
  /// A partition that fails to delete is logged and left for the next
  /// activation; the rest are still purged.
  pub fn purge_stale(&self) -> Result<Vec<String>> {
    let mut purged = Vec::new();
    for name in self.store.partitions()? {
      if self.names.is_live(&name) {
        continue;
      }
      match self.store.delete_partition(&name) {
        Ok(true) => {
          info!(partition = %name, "deleted stale cache partition");
          purged.push(name);
        }
        Ok(false) => {}
        Err(e) => warn!(error = %e, partition = %name, "failed to delete stale cache partition"),
      }
    }
    Ok(purged)
  }

  /// Record this version as the one serving requests, creating both live
  /// partitions so a later start can find them.
  pub fn mark_active(&self) -> Result<()> {
    self.store.open(&self.names.static_assets)?;
    self.store.open(&self.names.api)?;
    self.store.set_active_version(&self.version)
  }

  /// Whether an earlier process activated this version and both of its live
  /// partitions are still present.
  pub fn was_active(&self) -> bool {
    match self.store.active_version() {
      Ok(Some(version)) if version == self.version => {}
      Ok(_) => return false,
      Err(e) => {
        warn!(error = %e, "could not read the active version");
        return false;
      }
    }

    match self.store.partitions() {
      Ok(names) => {
        names.contains(&self.names.static_assets) && names.contains(&self.names.api)
      }
      Err(e) => {
        warn!(error = %e, "could not list cache partitions");
        false
      }
    }
  }

  fn lookup(&self, partition: &str, key: &CacheKey) -> Option<Response> {
    match self.store.get(partition, key) {
      Ok(entry) => entry.map(|e| e.response),
      Err(e) => {
        warn!(error = %e, partition, url = %key.url, "cache read failed");
        None
      }
    }
  }

  fn write(&self, partition: &str, entry: &CachedResponse) {
    if let Err(e) = self.store.put(partition, entry) {
      warn!(error = %e, partition, url = %entry.key.url, "cache write failed");
    }
  }
}

impl<C: CacheStore> Clone for PartitionManager<C> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      version: self.version.clone(),
      names: self.names.clone(),
      api_prefix: self.api_prefix.clone(),
    }
  }
}

/// First path segment after the API prefix: `/api/tasks/7` -> `tasks`.
pub fn resource_family(path: &str, api_prefix: &str) -> Option<String> {
  let prefix = api_prefix.trim_end_matches('/');
  let rest = path.strip_prefix(prefix)?;
  if !rest.is_empty() && !rest.starts_with('/') {
    return None;
  }
  rest
    .split('/')
    .find(|segment| !segment.is_empty())
    .map(String::from)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{FailingStorage, MemoryStorage};

  fn manager() -> PartitionManager<MemoryStorage> {
    PartitionManager::new(MemoryStorage::new(), "v2", "/api/")
  }

  #[test]
  fn test_resource_family() {
    assert_eq!(resource_family("/api/tasks", "/api/").as_deref(), Some("tasks"));
    assert_eq!(resource_family("/api/tasks/7", "/api/").as_deref(), Some("tasks"));
    assert_eq!(resource_family("/api/", "/api/"), None);
    assert_eq!(resource_family("/apix/tasks", "/api/"), None);
    assert_eq!(resource_family("/static/app.js", "/api/"), None);
  }

  #[test]
  fn test_api_entries_are_method_specific() {
    let cache = manager();
    let get = Request::get("http://h/api/tasks");
    cache.put_api(&get, &Response::new(200, "[]"));

    assert!(cache.match_api(&get).is_some());
    assert!(cache
      .match_api(&Request::new(Method::Head, "http://h/api/tasks"))
      .is_none());
  }

  #[test]
  fn test_invalidation_removes_list_and_detail_of_same_family() {
    let cache = manager();
    cache.put_api(&Request::get("http://h/api/tasks"), &Response::new(200, "[]"));
    cache.put_api(&Request::get("http://h/api/tasks/7"), &Response::new(200, "{}"));
    cache.put_api(&Request::get("http://h/api/projects"), &Response::new(200, "[]"));

    let removed = cache.invalidate_family_of("http://h/api/tasks/7");
    assert_eq!(removed, 2);

    let left = cache.store().list_keys(&cache.names().api).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].key.url, "http://h/api/projects");
  }

  #[test]
  fn test_purge_keeps_live_partitions_and_their_entries() {
    let cache = manager();
    let store = cache.store();
    store.open("taskflow-static-v1").unwrap();
    store.open("taskflow-api-v1").unwrap();
    store.open("something-else").unwrap();
    cache.put_static(&Request::get("http://h/index.html"), &Response::new(200, "<html>"));
    cache.put_api(&Request::get("http://h/api/tasks"), &Response::new(200, "[]"));

    let mut purged = cache.purge_stale().unwrap();
    purged.sort();
    assert_eq!(
      purged,
      vec!["something-else", "taskflow-api-v1", "taskflow-static-v1"]
    );

    let mut left = store.partitions().unwrap();
    left.sort();
    assert_eq!(left, vec!["taskflow-api-v2", "taskflow-static-v2"]);
    assert!(cache.match_static("http://h/index.html").is_some());
    assert!(cache.match_api(&Request::get("http://h/api/tasks")).is_some());
  }

  #[test]
  fn test_static_put_ignores_non_get() {
    let cache = manager();
    cache.put_static(
      &Request::new(Method::Post, "http://h/upload"),
      &Response::new(200, "ok"),
    );
    assert!(cache.match_static("http://h/upload").is_none());
  }

  #[test]
  fn test_purge_continues_past_a_failed_delete() {
    let store = FailingStorage::failing_deletes(&["taskflow-api-v1"]);
    store.open("taskflow-static-v1").unwrap();
    store.open("taskflow-api-v1").unwrap();
    store.open("taskflow-static-v0").unwrap();
    let cache = PartitionManager::new(store, "v2", "/api/");

    let mut purged = cache.purge_stale().unwrap();
    purged.sort();
    assert_eq!(purged, vec!["taskflow-static-v0", "taskflow-static-v1"]);
    assert_eq!(cache.store().partitions().unwrap(), vec!["taskflow-api-v1"]);
  }

  #[test]
  fn test_static_match_ignores_request_method() {
    let cache = manager();
    let get = Request::get("http://h/favicon.svg");
    cache.put_static(&get, &Response::new(200, "<svg/>"));

    let head = Request::new(Method::Head, "http://h/favicon.svg");
    assert_eq!(cache.match_static(&head.url).unwrap().body, b"<svg/>");
    assert!(cache.match_any(&head).is_some());
    assert!(cache.match_api(&head).is_none());
  }

  #[test]
  fn test_was_active_needs_matching_version_and_partitions() {
    let cache = manager();
    assert!(!cache.was_active());

    cache.mark_active().unwrap();
    assert!(cache.was_active());

    cache.store().set_active_version("v1").unwrap();
    assert!(!cache.was_active());

    cache.store().set_active_version("v2").unwrap();
    cache.store().delete_partition(&cache.names().api).unwrap();
    assert!(!cache.was_active());
  }

  #[test]
  fn test_broken_store_reads_as_misses() {
    let cache = PartitionManager::new(FailingStorage::new(), "v2", "/api/");
    let get = Request::get("http://h/api/tasks");

    cache.put_api(&get, &Response::new(200, "[]"));
    assert!(cache.match_api(&get).is_none());
    assert!(cache.match_static("http://h/index.html").is_none());
    assert_eq!(cache.invalidate_family_of("http://h/api/tasks/1"), 0);
    assert!(!cache.was_active());
  }
}
