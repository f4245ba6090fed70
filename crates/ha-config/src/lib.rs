//! HA Coordination Configuration
//!
//! TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HaConfig {
    pub coordination: CoordinationConfig,
    pub election: ElectionSettings,
}

/// Coordination store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Store endpoint, e.g. `redis://127.0.0.1:6379`
    pub address: String,
    /// Upper bound on a single store call in milliseconds
    pub operation_timeout_ms: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            address: "redis://127.0.0.1:6379".to_string(),
            operation_timeout_ms: 1000,
        }
    }
}

impl CoordinationConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Leader election settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionSettings {
    /// Well-known key of the single leadership slot
    pub lease_key: String,
    /// Candidate id (generated if empty)
    pub candidate_id: String,
    /// Lease TTL in milliseconds
    pub lease_ttl_ms: u64,
    /// Renewal interval in milliseconds (must be well below the TTL)
    pub renewal_interval_ms: u64,
    /// How often a passive node re-checks the lease in milliseconds
    pub poll_interval_ms: u64,
    /// Subtracted from the TTL when the leader computes its own lease deadline
    pub drift_margin_ms: u64,
    /// Renewal retries on store errors before leadership counts as lost
    pub renewal_retry_budget: u32,
    pub backoff: BackoffSettings,
}

impl Default for ElectionSettings {
    fn default() -> Self {
        Self {
            lease_key: "/service/leader".to_string(),
            candidate_id: String::new(),
            lease_ttl_ms: 2000,
            renewal_interval_ms: 500,
            poll_interval_ms: 500,
            drift_margin_ms: 200,
            renewal_retry_budget: 2,
            backoff: BackoffSettings::default(),
        }
    }
}

impl ElectionSettings {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_millis(self.renewal_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn drift_margin(&self) -> Duration {
        Duration::from_millis(self.drift_margin_ms)
    }
}

/// Backoff applied to store connectivity errors while passive
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
    /// Outage length after which connectivity errors are reported as errors
    pub max_retry_window_ms: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_ms: 100,
            max_ms: 5000,
            multiplier: 2.0,
            jitter: true,
            max_retry_window_ms: 60_000,
        }
    }
}

impl HaConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: HaConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override, then validate
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::new().load()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the timing relationships the election protocol depends on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let e = &self.election;

        if self.coordination.address.trim().is_empty() {
            return Err(invalid("coordination.address must not be empty"));
        }
        if self.coordination.operation_timeout_ms == 0 {
            return Err(invalid("coordination.operation_timeout_ms must be positive"));
        }
        if e.lease_key.trim().is_empty() {
            return Err(invalid("election.lease_key must not be empty"));
        }
        if e.lease_ttl_ms == 0 {
            return Err(invalid("election.lease_ttl_ms must be positive"));
        }
        if e.renewal_interval_ms == 0 {
            return Err(invalid("election.renewal_interval_ms must be positive"));
        }
        if e.poll_interval_ms == 0 {
            return Err(invalid("election.poll_interval_ms must be positive"));
        }
        if e.drift_margin_ms >= e.lease_ttl_ms {
            return Err(invalid("election.drift_margin_ms must be less than election.lease_ttl_ms"));
        }
        if e.renewal_interval_ms >= e.lease_ttl_ms - e.drift_margin_ms {
            return Err(ConfigError::ValidationError(format!(
                "election.renewal_interval_ms ({}) must be less than lease_ttl_ms - drift_margin_ms ({})",
                e.renewal_interval_ms,
                e.lease_ttl_ms - e.drift_margin_ms
            )));
        }
        if self.coordination.operation_timeout_ms >= e.lease_ttl_ms - e.drift_margin_ms {
            return Err(ConfigError::ValidationError(format!(
                "coordination.operation_timeout_ms ({}) must be less than lease_ttl_ms - drift_margin_ms ({})",
                self.coordination.operation_timeout_ms,
                e.lease_ttl_ms - e.drift_margin_ms
            )));
        }
        if e.backoff.multiplier.is_nan() || e.backoff.multiplier < 1.0 {
            return Err(invalid("election.backoff.multiplier must be at least 1.0"));
        }
        if e.backoff.initial_ms == 0 || e.backoff.max_ms < e.backoff.initial_ms {
            return Err(invalid("election.backoff requires 0 < initial_ms <= max_ms"));
        }

        if e.renewal_interval_ms * 2 > e.lease_ttl_ms {
            tracing::warn!(
                renewal_interval_ms = e.renewal_interval_ms,
                lease_ttl_ms = e.lease_ttl_ms,
                "Renewal interval is above half the lease TTL; a single missed renewal may cost leadership"
            );
        }

        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# HA Coordination Configuration
# Environment variables (HA_*) override these settings

[coordination]
address = "redis://127.0.0.1:6379"
operation_timeout_ms = 1000

[election]
lease_key = "/service/leader"
candidate_id = ""            # generated when empty
lease_ttl_ms = 2000
renewal_interval_ms = 500
poll_interval_ms = 500
drift_margin_ms = 200
renewal_retry_budget = 2

[election.backoff]
initial_ms = 100
max_ms = 5000
multiplier = 2.0
jitter = true
max_retry_window_ms = 60000
"#
        .to_string()
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = HaConfig::default();
        config.validate().unwrap();
        assert_eq!(config.election.lease_key, "/service/leader");
        assert_eq!(config.election.lease_ttl(), Duration::from_secs(2));
        assert!(config.election.renewal_interval() * 2 <= config.election.lease_ttl());
    }

    #[test]
    fn test_example_toml_parses_to_defaults() {
        let parsed: HaConfig = toml::from_str(&HaConfig::example_toml()).unwrap();
        let defaults = HaConfig::default();
        assert_eq!(parsed.coordination.address, defaults.coordination.address);
        assert_eq!(parsed.election.lease_ttl_ms, defaults.election.lease_ttl_ms);
        assert_eq!(parsed.election.backoff.max_ms, defaults.election.backoff.max_ms);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[election]\nlease_key = \"/orders/leader\"\nlease_ttl_ms = 4000").unwrap();

        let config = HaConfig::from_file(file.path()).unwrap();
        assert_eq!(config.election.lease_key, "/orders/leader");
        assert_eq!(config.election.lease_ttl_ms, 4000);
        assert_eq!(config.election.renewal_interval_ms, 500);
        assert_eq!(config.coordination.operation_timeout_ms, 1000);
    }

    #[test]
    fn test_renewal_must_fit_inside_ttl() {
        let mut config = HaConfig::default();
        config.election.renewal_interval_ms = 1800;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        config.election.renewal_interval_ms = 2500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_timeout_must_fit_inside_lease_window() {
        let mut config = HaConfig::default();
        config.coordination.operation_timeout_ms = 3000;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        config.coordination.operation_timeout_ms = 1800;
        assert!(config.validate().is_err());

        config.coordination.operation_timeout_ms = 1799;
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_empty_lease_key_and_zero_poll() {
        let mut config = HaConfig::default();
        config.election.lease_key = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = HaConfig::default();
        config.election.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_shrinking_backoff() {
        let mut config = HaConfig::default();
        config.election.backoff.multiplier = 0.5;
        assert!(config.validate().is_err());
    }
}
