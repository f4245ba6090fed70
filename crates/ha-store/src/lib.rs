//! Coordination Store
//!
//! The election protocol only needs a handful of atomic primitives from the
//! shared key-value store:
//!
//! - **create-if-absent** with expiry, used to claim the leadership slot
//! - **compare-and-swap**, used to renew a lease only while still owning it
//! - **compare-and-delete**, used to release a lease only while still owning it
//! - **get** and an optional **watch**, used by passive nodes to notice a
//!   vacant slot
//!
//! Every write that depends on the current value is conditional on that
//! value; there is no read-then-write path.

mod error;
mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Outcome of [`CoordinationStore::create_if_absent`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The key already exists; carries the current holder
    AlreadyExists(String),
}

/// Outcome of [`CoordinationStore::compare_and_swap`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    Swapped,
    /// The key holds a different value; carries it
    Mismatch(String),
    NotFound,
}

/// Outcome of [`CoordinationStore::compare_and_delete`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Mismatch,
    NotFound,
}

/// Change notification for a watched key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Put(String),
    Deleted,
    Expired,
}

impl WatchEvent {
    /// Whether the event leaves the key vacant
    pub fn is_vacancy(&self) -> bool {
        matches!(self, WatchEvent::Deleted | WatchEvent::Expired)
    }
}

/// Stream of change events for one key. Ends on disconnect; callers may
/// watch again.
pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Strongly-consistent key-value store with conditional writes and expiry
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Create `key` with `value` and expiry `ttl` only if it does not exist
    async fn create_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<CreateOutcome>;

    /// Replace the value and refresh the expiry only if the current value is `expected`
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new_value: &str,
        ttl: Duration,
    ) -> Result<SwapOutcome>;

    /// Delete `key` only if its current value is `expected`
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<DeleteOutcome>;

    /// Current value of `key`, if present and unexpired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Subscribe to changes of `key`.
    ///
    /// Returns `Ok(None)` when the store cannot notify; callers fall back to
    /// polling with [`get`](Self::get).
    async fn watch(&self, _key: &str) -> Result<Option<WatchStream>> {
        Ok(None)
    }

    /// Short backend name for logs
    fn backend(&self) -> &'static str;
}
