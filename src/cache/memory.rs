//! In-process cache store. Contents do not survive a restart.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::traits::{CacheKey, CacheStore, CachedResponse, StoredKey};

type Partition = BTreeMap<String, CachedResponse>;

#[derive(Default)]
pub struct MemoryStorage {
  partitions: Mutex<BTreeMap<String, Partition>>,
  active_version: Mutex<Option<String>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn with<R>(&self, f: impl FnOnce(&mut BTreeMap<String, Partition>) -> R) -> Result<R> {
    let mut partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(f(&mut partitions))
  }
}

impl CacheStore for MemoryStorage {
  fn open(&self, partition: &str) -> Result<()> {
    self.with(|p| {
      p.entry(partition.to_string()).or_default();
    })
  }

  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    self.with(|p| {
      p.get(partition)
        .and_then(|entries| entries.get(&key.cache_hash()))
        .cloned()
    })
  }

  fn put(&self, partition: &str, entry: &CachedResponse) -> Result<()> {
    self.with(|p| {
      p.entry(partition.to_string())
        .or_default()
        .insert(entry.key.cache_hash(), entry.clone());
    })
  }

  fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool> {
    self.with(|p| {
      p.get_mut(partition)
        .map(|entries| entries.remove(&key.cache_hash()).is_some())
        .unwrap_or(false)
    })
  }

  fn list_keys(&self, partition: &str) -> Result<Vec<StoredKey>> {
    self.with(|p| {
      p.get(partition)
        .map(|entries| {
          entries
            .values()
            .map(|e| StoredKey {
              key: e.key.clone(),
              family: e.family.clone(),
            })
            .collect()
        })
        .unwrap_or_default()
    })
  }

  fn partitions(&self) -> Result<Vec<String>> {
    self.with(|p| p.keys().cloned().collect())
  }

  fn delete_partition(&self, partition: &str) -> Result<bool> {
    self.with(|p| p.remove(partition).is_some())
  }

  fn active_version(&self) -> Result<Option<String>> {
    let version = self
      .active_version
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(version.clone())
  }

  fn set_active_version(&self, version: &str) -> Result<()> {
    let mut active = self
      .active_version
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *active = Some(version.to_string());
    Ok(())
  }
}

/// Store that fails on demand, for exercising degraded paths.
#[cfg(test)]
pub struct FailingStorage {
  inner: MemoryStorage,
  /// `None`: every call fails. `Some`: only deleting these partitions fails.
  broken_partitions: Option<Vec<String>>,
}

#[cfg(test)]
impl FailingStorage {
  /// Every operation errors, as with storage disabled.
  pub fn new() -> Self {
    Self {
      inner: MemoryStorage::new(),
      broken_partitions: None,
    }
  }

  /// Works normally except for deleting the named partitions.
  pub fn failing_deletes(partitions: &[&str]) -> Self {
    Self {
      inner: MemoryStorage::new(),
      broken_partitions: Some(partitions.iter().map(|p| p.to_string()).collect()),
    }
  }

  fn check(&self) -> Result<()> {
    match self.broken_partitions {
      None => Err(eyre!("Cache storage is disabled")),
      Some(_) => Ok(()),
    }
  }
}

#[cfg(test)]
impl CacheStore for FailingStorage {
  fn open(&self, partition: &str) -> Result<()> {
    self.check()?;
    self.inner.open(partition)
  }

  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    self.check()?;
    self.inner.get(partition, key)
  }

  fn put(&self, partition: &str, entry: &CachedResponse) -> Result<()> {
    self.check()?;
    self.inner.put(partition, entry)
  }

  fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool> {
    self.check()?;
    self.inner.delete(partition, key)
  }

  fn list_keys(&self, partition: &str) -> Result<Vec<StoredKey>> {
    self.check()?;
    self.inner.list_keys(partition)
  }

  fn partitions(&self) -> Result<Vec<String>> {
    self.check()?;
    self.inner.partitions()
  }

  fn delete_partition(&self, partition: &str) -> Result<bool> {
    self.check()?;
    if let Some(broken) = &self.broken_partitions {
      if broken.iter().any(|p| p == partition) {
        return Err(eyre!("Failed to delete partition {}", partition));
      }
    }
    self.inner.delete_partition(partition)
  }

  fn active_version(&self) -> Result<Option<String>> {
    self.check()?;
    self.inner.active_version()
  }

  fn set_active_version(&self, version: &str) -> Result<()> {
    self.check()?;
    self.inner.set_active_version(version)
  }
}
