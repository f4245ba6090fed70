//! Error types for the election coordinator

use ha_lifecycle::LifecycleError;
use ha_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ElectionError {
    /// Invalid transition or failing controlled instance; fatal
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Coordination store error: {0}")]
    Store(#[from] StoreError),

    #[error("Coordinator already started")]
    AlreadyRunning,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Election task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, ElectionError>;
