//! Error types for coordination store access

use std::time::Duration;
use thiserror::Error;

/// Failure to talk to the coordination store.
///
/// Contention (a key held by someone else, a value mismatch) is never an
/// error; it is reported through the operation outcome types instead.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store connection error: {0}")]
    Connection(String),

    #[error("Redis operation error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected store reply: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
