//! Error types for the lifecycle module

use thiserror::Error;

use crate::lifecycle::{LifecycleState, Transition};

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Cannot {transition} from state {from}")]
    InvalidTransition {
        transition: Transition,
        from: LifecycleState,
    },

    #[error("Controlled instance failed to {transition}: {source}")]
    InstanceFailed {
        transition: Transition,
        #[source]
        source: anyhow::Error,
    },
}

impl LifecycleError {
    /// The transition that was refused or failed
    pub fn transition(&self) -> Transition {
        match self {
            LifecycleError::InvalidTransition { transition, .. } => *transition,
            LifecycleError::InstanceFailed { transition, .. } => *transition,
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
