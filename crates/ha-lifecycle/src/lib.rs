//! Instance Lifecycle
//!
//! Wraps a user-supplied [`ControlledInstance`] in a guarded state machine:
//!
//! ```text
//! Unloaded --load--> Loaded --passivate--> Passive <--passivate-- Active
//!                                              |--activate-->Active
//! ```
//!
//! Every transition holds the transition guard for its full duration, so the
//! hook call and the state update are atomic with respect to other
//! transitions. A failing hook leaves the state where it was.

mod error;
mod lifecycle;

pub use error::{LifecycleError, Result};
pub use lifecycle::{ControlledInstance, InstanceLifecycle, LifecycleState, Transition};
