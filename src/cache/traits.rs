//! Core traits and types for the cache partitions.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use sha2::{Digest, Sha256};

use crate::http::{Method, Request, Response};

/// Canonical request descriptor a cache entry is stored under.
///
/// Static assets are keyed by URL alone; API responses by method and URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub method: Option<Method>,
  pub url: String,
}

impl CacheKey {
  /// Method-insensitive key.
  pub fn for_url(url: &str) -> Self {
    Self {
      method: None,
      url: url.to_string(),
    }
  }

  /// Method + URL key.
  pub fn for_request(request: &Request) -> Self {
    Self {
      method: Some(request.method.clone()),
      url: request.url.clone(),
    }
  }

  /// Stable fixed-length hash used as the storage key.
  pub fn cache_hash(&self) -> String {
    let method = self.method.as_ref().map(Method::as_str).unwrap_or("*");

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response snapshot held in a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub key: CacheKey,
  pub response: Response,
  /// Resource family recorded at write time (API partition only).
  pub family: Option<String>,
  pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
  pub fn new(key: CacheKey, response: Response, family: Option<String>) -> Self {
    Self {
      key,
      response,
      family,
      cached_at: Utc::now(),
    }
  }
}

/// Key listing entry, without the response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredKey {
  pub key: CacheKey,
  pub family: Option<String>,
}

/// Trait for cache storage backends holding named partitions.
pub trait CacheStore: Send + Sync + 'static {
  /// Create the partition if it does not exist yet.
  fn open(&self, partition: &str) -> Result<()>;

  /// Look up an entry.
  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CachedResponse>>;

  /// Insert or overwrite an entry, creating the partition if needed.
  fn put(&self, partition: &str, entry: &CachedResponse) -> Result<()>;

  /// Remove an entry. Returns whether one existed.
  fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool>;

  /// All keys stored in a partition.
  fn list_keys(&self, partition: &str) -> Result<Vec<StoredKey>>;

  /// Names of every partition, from any version.
  fn partitions(&self) -> Result<Vec<String>>;

  /// Drop a partition and all of its entries. Returns whether it existed.
  fn delete_partition(&self, partition: &str) -> Result<bool>;

  /// Version token recorded by the last activation, if any.
  fn active_version(&self) -> Result<Option<String>>;

  /// Record the version whose partitions are serving requests.
  fn set_active_version(&self, version: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_request_key_includes_method() {
    let get = CacheKey::for_request(&Request::get("http://h/api/tasks"));
    let head = CacheKey::for_request(&Request::new(Method::Head, "http://h/api/tasks"));
    assert_ne!(get.cache_hash(), head.cache_hash());
    assert_ne!(get.cache_hash(), CacheKey::for_url("http://h/api/tasks").cache_hash());
  }
}
