//! HA Node
//!
//! Runs one member of a single-active / multi-standby group:
//! - Claims the leadership lease in Redis
//! - Activates the worker while leader, keeps it passive otherwise
//! - Releases the lease on Ctrl+C / SIGTERM so a standby takes over at once
//!
//! ## Configuration
//!
//! Read from `HA_CONFIG`, `ha.toml` or `/etc/ha-node/ha.toml`, then
//! overridden by environment variables:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HA_COORDINATION_ADDRESS` | `redis://127.0.0.1:6379` | Coordination store URL |
//! | `HA_LEASE_KEY` | `/service/leader` | Key of the leadership slot |
//! | `HA_CANDIDATE_ID` | random UUID | Id written into the lease |
//! | `HA_LEASE_TTL_MS` | `2000` | Lease expiry |
//! | `HA_RENEWAL_INTERVAL_MS` | `500` | Time between renewals |
//! | `HA_WORK_INTERVAL_MS` | `1000` | Period of the demo worker |
//! | `LOG_FORMAT` | `text` | `json` or `text` |
//! | `RUST_LOG` | `info` | Log level |

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use ha_common::UuidCandidateIds;
use ha_config::HaConfig;
use ha_election::{ElectionConfig, ElectionCoordinator, LeadershipStatus};
use ha_lifecycle::ControlledInstance;
use ha_store::RedisStore;

const MIN_WORK_INTERVAL: Duration = Duration::from_millis(1);

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Demo workload: a periodic job that only runs while this node is active
struct Worker {
    interval: Duration,
    job: Option<JoinHandle<()>>,
}

impl Worker {
    /// `interval` is raised to at least 1ms; tokio intervals cannot tick at zero
    fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_WORK_INTERVAL),
            job: None,
        }
    }

    fn stop_job(&mut self) {
        if let Some(job) = self.job.take() {
            job.abort();
            info!("Worker job stopped");
        }
    }
}

#[async_trait]
impl ControlledInstance for Worker {
    async fn on_load(&mut self) -> Result<()> {
        info!(interval_ms = self.interval.as_millis() as u64, "Worker loaded");
        Ok(())
    }

    async fn on_passivate(&mut self) -> Result<()> {
        self.stop_job();
        Ok(())
    }

    async fn on_activate(&mut self) -> Result<()> {
        self.stop_job();

        let interval = self.interval;
        self.job = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut runs: u64 = 0;
            loop {
                ticker.tick().await;
                runs += 1;
                info!(runs, "Worker running as the active instance");
            }
        }));

        info!("Worker job started");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    ha_common::logging::init_logging("ha-node");

    info!("Starting HA node");

    let config = HaConfig::load()?;
    let work_interval = Duration::from_millis(env_or_parse("HA_WORK_INTERVAL_MS", 1000));

    info!("Connecting to coordination store: {}", config.coordination.address);
    let store = Arc::new(RedisStore::connect(&config.coordination.address).await?);

    let election = ElectionConfig::from_settings(&config, &UuidCandidateIds);
    let shutdown_budget = election.lease_ttl + election.store_timeout * 2;
    let coordinator = Arc::new(ElectionCoordinator::new(
        election,
        store,
        Box::new(Worker::new(work_interval)),
    )?);

    coordinator.clone().start().await?;
    info!(candidate_id = %coordinator.candidate_id(), "HA node started");
    info!("Press Ctrl+C to shutdown");

    let mut status = coordinator.subscribe();
    tokio::select! {
        _ = shutdown_signal() => info!("Shutdown signal received..."),
        _ = status.wait_for(|s| *s == LeadershipStatus::Failed) => {
            error!("Election coordinator failed, shutting down");
        }
    }

    match tokio::time::timeout(shutdown_budget, coordinator.stop()).await {
        Ok(Ok(())) => info!("HA node shutdown complete"),
        Ok(Err(e)) => {
            error!(error = %e, "HA node stopped with an error");
            return Err(e.into());
        }
        Err(_) => warn!(?shutdown_budget, "Timed out waiting for the election loop to stop"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_worker_runs_only_while_active() {
        let mut worker = Worker::new(Duration::from_millis(100));
        worker.on_load().await.unwrap();
        assert!(worker.job.is_none());

        worker.on_activate().await.unwrap();
        assert!(worker.job.as_ref().is_some_and(|job| !job.is_finished()));

        worker.on_passivate().await.unwrap();
        assert!(worker.job.is_none());

        worker.on_passivate().await.unwrap();
        assert!(worker.job.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_work_interval_is_clamped() {
        let mut worker = Worker::new(Duration::ZERO);
        assert_eq!(worker.interval, MIN_WORK_INTERVAL);

        worker.on_activate().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(worker.job.as_ref().is_some_and(|job| !job.is_finished()));

        worker.on_passivate().await.unwrap();
    }

    #[test]
    fn test_env_or_parse_falls_back() {
        let value: u64 = env_or_parse("HA_NODE_TEST_UNSET_VARIABLE", 42);
        assert_eq!(value, 42);
    }
}
