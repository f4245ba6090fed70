use serde::{Deserialize, Serialize};
use std::fmt;

pub mod logging;

// ============================================================================
// Candidate Identity
// ============================================================================

/// The value a process writes into the leadership record to claim it.
///
/// Stable for the lifetime of the process and distinct across cooperating
/// processes with very high probability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(String);

impl CandidateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CandidateId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CandidateId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Source of fresh candidate ids for processes that don't configure one.
pub trait CandidateIdGenerator: Send + Sync {
    fn generate(&self) -> CandidateId;
}

/// Random UUID v4 candidate ids
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidCandidateIds;

impl CandidateIdGenerator for UuidCandidateIds {
    fn generate(&self) -> CandidateId {
        CandidateId(uuid::Uuid::new_v4().to_string())
    }
}

/// Use the configured id when present, otherwise ask the generator.
pub fn resolve_candidate_id(configured: &str, generator: &dyn CandidateIdGenerator) -> CandidateId {
    let configured = configured.trim();
    if configured.is_empty() {
        generator.generate()
    } else {
        CandidateId::new(configured)
    }
}
