use std::time::Duration;

use ha_common::{resolve_candidate_id, CandidateId, CandidateIdGenerator};
use ha_config::{ElectionSettings, HaConfig};

use crate::backoff::BackoffConfig;
use crate::error::{ElectionError, Result};

/// Configuration for one election coordinator
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Value written into the lease to claim it
    pub candidate_id: CandidateId,

    /// Key of the single leadership slot
    pub lease_key: String,

    /// Expiry applied by the store to an unrenewed lease
    pub lease_ttl: Duration,

    /// Time between renewals (well below the TTL)
    pub renewal_interval: Duration,

    /// How often a passive coordinator re-reads the lease
    pub poll_interval: Duration,

    /// Subtracted from the TTL for the leader's own lease deadline
    pub drift_margin: Duration,

    /// Renewal retries on store errors before leadership counts as lost
    pub renewal_retry_budget: u32,

    /// Upper bound on a single store call
    pub store_timeout: Duration,

    pub backoff: BackoffConfig,
}

impl ElectionConfig {
    pub fn new(candidate_id: impl Into<CandidateId>) -> Self {
        Self::from_parts(candidate_id.into(), &ElectionSettings::default(), Duration::from_secs(1))
    }

    /// Build from loaded configuration, generating a candidate id if none is set
    pub fn from_settings(config: &HaConfig, ids: &dyn CandidateIdGenerator) -> Self {
        let candidate_id = resolve_candidate_id(&config.election.candidate_id, ids);
        Self::from_parts(candidate_id, &config.election, config.coordination.operation_timeout())
    }

    fn from_parts(candidate_id: CandidateId, settings: &ElectionSettings, store_timeout: Duration) -> Self {
        Self {
            candidate_id,
            lease_key: settings.lease_key.clone(),
            lease_ttl: settings.lease_ttl(),
            renewal_interval: settings.renewal_interval(),
            poll_interval: settings.poll_interval(),
            drift_margin: settings.drift_margin(),
            renewal_retry_budget: settings.renewal_retry_budget,
            store_timeout,
            backoff: BackoffConfig::from(&settings.backoff),
        }
    }

    pub fn with_lease_key(mut self, key: impl Into<String>) -> Self {
        self.lease_key = key.into();
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
        self.renewal_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_drift_margin(mut self, margin: Duration) -> Self {
        self.drift_margin = margin;
        self
    }

    pub fn with_renewal_retry_budget(mut self, retries: u32) -> Self {
        self.renewal_retry_budget = retries;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// How long after a successful renewal was sent the leader may still act
    pub fn lease_window(&self) -> Duration {
        self.lease_ttl.saturating_sub(self.drift_margin)
    }

    pub fn validate(&self) -> Result<()> {
        if self.candidate_id.as_str().is_empty() {
            return Err(ElectionError::Config("candidate id must not be empty".to_string()));
        }
        if self.lease_key.is_empty() {
            return Err(ElectionError::Config("lease key must not be empty".to_string()));
        }
        if self.poll_interval.is_zero() || self.renewal_interval.is_zero() || self.store_timeout.is_zero() {
            return Err(ElectionError::Config(
                "poll interval, renewal interval and store timeout must be positive".to_string(),
            ));
        }
        if self.store_timeout >= self.lease_window() {
            return Err(ElectionError::Config(format!(
                "store timeout {:?} must be shorter than lease TTL {:?} minus drift margin {:?}",
                self.store_timeout, self.lease_ttl, self.drift_margin
            )));
        }
        if self.renewal_interval >= self.lease_window() {
            return Err(ElectionError::Config(format!(
                "renewal interval {:?} must be shorter than lease TTL {:?} minus drift margin {:?}",
                self.renewal_interval, self.lease_ttl, self.drift_margin
            )));
        }
        let backoff = &self.backoff;
        if backoff.initial.is_zero() || backoff.max < backoff.initial {
            return Err(ElectionError::Config(format!(
                "backoff requires 0 < initial <= max, got initial {:?} and max {:?}",
                backoff.initial, backoff.max
            )));
        }
        if !backoff.multiplier.is_finite() || backoff.multiplier < 1.0 {
            return Err(ElectionError::Config(format!(
                "backoff multiplier must be a finite value of at least 1.0, got {}",
                backoff.multiplier
            )));
        }
        Ok(())
    }
}
