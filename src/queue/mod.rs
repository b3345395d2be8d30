//! Durable queue of mutating requests that failed at the network boundary.

mod memory;
mod store;

#[cfg(test)]
pub use memory::FailingQueue;
pub use memory::MemoryQueue;
pub use store::{PendingRequest, QueueStore, SqliteQueue};
