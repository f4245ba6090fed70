//! Configuration loader with file and environment variable support

use crate::{ConfigError, HaConfig};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "ha.toml",
    "config.toml",
    "./config/ha.toml",
    "/etc/ha-node/ha.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<HaConfig, ConfigError> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                info!(?path, "Loading configuration from file");
                HaConfig::from_file(&path)?
            }
            None => HaConfig::default(),
        };

        apply_overrides(&mut config, |key| env::var(key).ok());

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!(?path, "Configured file does not exist, searching defaults");
        }

        if let Ok(path) = env::var("HA_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `HA_*` overrides using `lookup` to read variables.
///
/// Unparseable numeric values are ignored with a warning so a typo in one
/// variable does not hide the rest of the configuration.
pub(crate) fn apply_overrides<F>(config: &mut HaConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // Coordination store
    if let Some(val) = lookup("HA_COORDINATION_ADDRESS") {
        config.coordination.address = val;
    }
    parse_into(&lookup, "HA_COORDINATION_TIMEOUT_MS", &mut config.coordination.operation_timeout_ms);

    // Election
    let election = &mut config.election;
    if let Some(val) = lookup("HA_LEASE_KEY") {
        election.lease_key = val;
    }
    if let Some(val) = lookup("HA_CANDIDATE_ID") {
        election.candidate_id = val;
    }
    parse_into(&lookup, "HA_LEASE_TTL_MS", &mut election.lease_ttl_ms);
    parse_into(&lookup, "HA_RENEWAL_INTERVAL_MS", &mut election.renewal_interval_ms);
    parse_into(&lookup, "HA_POLL_INTERVAL_MS", &mut election.poll_interval_ms);
    parse_into(&lookup, "HA_DRIFT_MARGIN_MS", &mut election.drift_margin_ms);
    parse_into(&lookup, "HA_RENEWAL_RETRY_BUDGET", &mut election.renewal_retry_budget);

    // Backoff
    let backoff = &mut election.backoff;
    parse_into(&lookup, "HA_BACKOFF_INITIAL_MS", &mut backoff.initial_ms);
    parse_into(&lookup, "HA_BACKOFF_MAX_MS", &mut backoff.max_ms);
    parse_into(&lookup, "HA_BACKOFF_MULTIPLIER", &mut backoff.multiplier);
    parse_into(&lookup, "HA_BACKOFF_JITTER", &mut backoff.jitter);
    parse_into(&lookup, "HA_BACKOFF_MAX_RETRY_WINDOW_MS", &mut backoff.max_retry_window_ms);
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(val) = lookup(key) {
        match val.trim().parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(key, value = %val, "Ignoring unparseable environment override"),
        }
    }
}
