//! Single-active / multi-standby leader election
//!
//! Keeps exactly one process of a group active, coordinated through a
//! lease in a shared [`CoordinationStore`](ha_store::CoordinationStore).
//!
//! # Features
//!
//! - **Exclusive claim**: atomic create-if-absent with expiry
//! - **Conditional renewal**: the lease is only refreshed while it still
//!   carries this candidate's id; a missed or refused renewal demotes
//! - **Fail-safe timing**: the leader steps down before the store can expire
//!   its lease, even if renewal calls hang
//! - **Fast hand-off**: `stop()` passivates and releases the lease, and
//!   waiting candidates wake on the change notification
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ha_election::{ElectionConfig, ElectionCoordinator};
//! use ha_lifecycle::ControlledInstance;
//! use ha_store::RedisStore;
//!
//! async fn example(instance: Box<dyn ControlledInstance>) -> ha_election::Result<()> {
//!     let store = Arc::new(RedisStore::connect("redis://localhost:6379").await?);
//!     let config = ElectionConfig::new("node-a").with_lease_key("/orders/leader");
//!
//!     let coordinator = Arc::new(ElectionCoordinator::new(config, store, instance)?);
//!     coordinator.clone().start().await?;
//!
//!     coordinator.wait_for_leadership().await;
//!     // ... serve until asked to stop ...
//!     coordinator.stop().await
//! }
//! ```

mod backoff;
mod config;
mod coordinator;
mod error;

pub use backoff::{Backoff, BackoffConfig};
pub use config::ElectionConfig;
pub use coordinator::{ElectionCoordinator, LeadershipStatus, RunState};
pub use error::{ElectionError, Result};
