//! Named cache partitions for static assets and API responses.
//!
//! This module provides:
//! - A storage seam (`CacheStore`) with SQLite and in-memory backends
//! - A partition manager that owns the two live, versioned partitions
//! - Per-partition key canonicalization and resource-family invalidation

mod memory;
mod partitions;
mod storage;
mod traits;

#[cfg(test)]
pub use memory::FailingStorage;
pub use memory::MemoryStorage;
pub use partitions::PartitionManager;
pub use storage::SqliteStorage;
pub use traits::CacheStore;
