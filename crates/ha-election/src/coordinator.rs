//! Lease-based Leader Election
//!
//! One background task per coordinator:
//! - `create_if_absent` with expiry to claim the leadership slot
//! - conditional renewal on a timer while leader
//! - watch (or bounded polling) while another candidate holds the slot
//! - conditional release on shutdown
//!
//! The lifecycle follows the observed leadership: `activate` after a
//! successful claim, `passivate` as soon as leadership is lost or the
//! coordinator stops.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use ha_common::CandidateId;
use ha_lifecycle::{ControlledInstance, InstanceLifecycle, LifecycleState};
use ha_store::{
    CoordinationStore, CreateOutcome, DeleteOutcome, StoreError, SwapOutcome, WatchEvent,
    WatchStream,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::backoff::Backoff;
use crate::config::ElectionConfig;
use crate::error::{ElectionError, Result};

/// Leadership status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipStatus {
    /// This instance is the leader
    Leader,
    /// Another instance is the leader, or the slot is being contested
    Follower,
    /// Leadership is unknown (not started yet, or the store is unreachable)
    Unknown,
    /// The controlled instance failed a transition; the coordinator gave up
    Failed,
}

/// Lifetime of the background election loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// What the loop may still own when it is asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    None,
    Held,
    /// A claim timed out; it may have reached the store
    Uncertain,
}

enum LeaseEnd {
    Lost,
    Shutdown,
}

enum Renewal {
    Renewed(Instant),
    Lost,
    Shutdown,
}

/// Drives an [`InstanceLifecycle`] from the state of a shared lease
pub struct ElectionCoordinator {
    config: ElectionConfig,
    store: Arc<dyn CoordinationStore>,
    lifecycle: InstanceLifecycle,
    started: AtomicBool,
    run_state: parking_lot::Mutex<RunState>,
    shutdown_tx: watch::Sender<bool>,
    status_tx: watch::Sender<LeadershipStatus>,
    task: tokio::sync::Mutex<Option<JoinHandle<Result<()>>>>,
}

impl ElectionCoordinator {
    pub fn new(
        config: ElectionConfig,
        store: Arc<dyn CoordinationStore>,
        instance: Box<dyn ControlledInstance>,
    ) -> Result<Self> {
        config.validate()?;

        let (shutdown_tx, _) = watch::channel(false);
        let (status_tx, _) = watch::channel(LeadershipStatus::Unknown);

        Ok(Self {
            config,
            store,
            lifecycle: InstanceLifecycle::new(instance),
            started: AtomicBool::new(false),
            run_state: parking_lot::Mutex::new(RunState::Stopped),
            shutdown_tx,
            status_tx,
            task: tokio::sync::Mutex::new(None),
        })
    }

    pub fn candidate_id(&self) -> &CandidateId {
        &self.config.candidate_id
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Check if this instance currently holds leadership
    pub fn is_leader(&self) -> bool {
        self.status() == LeadershipStatus::Leader
    }

    pub fn status(&self) -> LeadershipStatus {
        *self.status_tx.borrow()
    }

    /// Subscribe to leadership status changes
    pub fn subscribe(&self) -> watch::Receiver<LeadershipStatus> {
        self.status_tx.subscribe()
    }

    pub fn run_state(&self) -> RunState {
        *self.run_state.lock()
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Subscribe to lifecycle state changes of the controlled instance
    pub fn subscribe_lifecycle(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Wait until this instance becomes the leader.
    ///
    /// Returns early if the coordinator fails.
    pub async fn wait_for_leadership(&self) {
        let mut rx = self.subscribe();
        let _ = rx
            .wait_for(|status| matches!(status, LeadershipStatus::Leader | LeadershipStatus::Failed))
            .await;
    }

    /// Load and passivate the controlled instance, then spawn the election loop.
    ///
    /// Lifecycle failures here are returned directly and the loop is never
    /// started. A coordinator can only be started once.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ElectionError::AlreadyRunning);
        }
        *self.run_state.lock() = RunState::Starting;

        info!(
            candidate_id = %self.config.candidate_id,
            lease_key = %self.config.lease_key,
            backend = self.store.backend(),
            "Starting election coordinator"
        );

        if let Err(e) = self.prepare_instance().await {
            error!(candidate_id = %self.config.candidate_id, error = %e, "Controlled instance failed during startup");
            self.set_status(LeadershipStatus::Failed);
            *self.run_state.lock() = RunState::Stopped;
            return Err(e);
        }

        // Held until the handle is stored so a concurrent stop() always joins the loop
        let mut task = self.task.lock().await;
        if *self.shutdown_tx.borrow() {
            info!(candidate_id = %self.config.candidate_id, "Stop requested during startup, not entering election");
            *self.run_state.lock() = RunState::Stopped;
            return Ok(());
        }

        let span = info_span!(
            "election",
            candidate_id = %self.config.candidate_id,
            lease_key = %self.config.lease_key,
        );
        let shutdown_rx = self.shutdown_tx.subscribe();
        let coordinator = self.clone();

        *self.run_state.lock() = RunState::Running;
        let handle = tokio::spawn(async move { coordinator.run(shutdown_rx).await }.instrument(span));
        *task = Some(handle);

        Ok(())
    }

    /// Stop the election loop and wait for it to finish.
    ///
    /// Passivates the instance and releases the lease if held. Returns the
    /// fatal error that ended the loop, if any.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.run_state.lock();
            if matches!(*state, RunState::Starting | RunState::Running) {
                *state = RunState::Stopping;
            }
        }

        info!(candidate_id = %self.config.candidate_id, "Stopping election coordinator");
        self.shutdown_tx.send_replace(true);

        let handle = self.task.lock().await.take();
        match handle {
            Some(handle) => match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(ElectionError::TaskFailed(e.to_string())),
            },
            None => Ok(()),
        }
    }

    async fn prepare_instance(&self) -> Result<()> {
        self.lifecycle.load().await?;
        self.lifecycle.passivate().await?;
        Ok(())
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let outcome = match self.election_loop(&mut shutdown).await {
            Ok(claim) => self.shut_down(claim).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            error!(error = %e, "Election loop stopped on a fatal error");
            self.set_status(LeadershipStatus::Failed);
        }

        *self.run_state.lock() = RunState::Stopped;
        outcome
    }

    /// Acquire / watch / renew until shutdown. Returns what may still be held.
    async fn election_loop(&self, shutdown: &mut watch::Receiver<bool>) -> Result<Claim> {
        let mut backoff = Backoff::new(self.config.backoff.clone());
        let mut uncertain = false;

        loop {
            if *shutdown.borrow() {
                return Ok(if uncertain { Claim::Uncertain } else { Claim::None });
            }

            let sent = Instant::now();
            let attempt = self
                .call(self.config.store_timeout, self.store.create_if_absent(
                    &self.config.lease_key,
                    self.config.candidate_id.as_str(),
                    self.config.lease_ttl,
                ))
                .await;

            match attempt {
                Ok(CreateOutcome::Created) => {
                    backoff.reset();
                    uncertain = false;
                    info!("Acquired leadership");

                    if let LeaseEnd::Shutdown = self.lead(sent, shutdown).await? {
                        return Ok(Claim::Held);
                    }
                }
                Ok(CreateOutcome::AlreadyExists(holder)) if holder == self.config.candidate_id.as_str() => {
                    backoff.reset();
                    uncertain = false;
                    // Our own record from an earlier claim; refresh it before trusting its expiry
                    if let Some(LeaseEnd::Shutdown) = self.reclaim(&mut uncertain, shutdown).await? {
                        return Ok(Claim::Held);
                    }
                }
                Ok(CreateOutcome::AlreadyExists(holder)) => {
                    backoff.reset();
                    uncertain = false;
                    debug!(%holder, "Leadership held by another candidate");
                    self.set_status(LeadershipStatus::Follower);
                    self.wait_for_vacancy(shutdown).await;
                }
                Err(e) => {
                    if matches!(e, StoreError::Timeout(_)) {
                        uncertain = true;
                    }
                    self.set_status(LeadershipStatus::Unknown);

                    let delay = backoff.next_delay();
                    if backoff.window_exceeded() {
                        error!(
                            error = %e,
                            attempt = backoff.attempts(),
                            outage_secs = backoff.outage_duration().as_secs(),
                            "Coordination store unreachable, still retrying"
                        );
                    } else {
                        warn!(error = %e, attempt = backoff.attempts(), ?delay, "Leadership claim failed, backing off");
                    }

                    if sleep_or_shutdown(delay, shutdown).await {
                        return Ok(if uncertain { Claim::Uncertain } else { Claim::None });
                    }
                }
            }
        }
    }

    /// Refresh a lease that already carries our candidate id, then lead.
    ///
    /// Sets `uncertain` when the refresh timed out, since it may still have landed.
    async fn reclaim(
        &self,
        uncertain: &mut bool,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<LeaseEnd>> {
        let sent = Instant::now();
        let refreshed = self
            .call(self.config.store_timeout, self.store.compare_and_swap(
                &self.config.lease_key,
                self.config.candidate_id.as_str(),
                self.config.candidate_id.as_str(),
                self.config.lease_ttl,
            ))
            .await;

        match refreshed {
            Ok(SwapOutcome::Swapped) => {
                info!("Reclaimed leadership record carrying our candidate id");
                self.lead(sent, shutdown).await.map(Some)
            }
            Ok(outcome) => {
                debug!(?outcome, "Own leadership record changed before it could be reclaimed");
                Ok(None)
            }
            Err(e) => {
                *uncertain = matches!(e, StoreError::Timeout(_));
                warn!(error = %e, "Failed to reclaim own leadership record");
                Ok(None)
            }
        }
    }

    /// Activate, then renew until leadership ends.
    ///
    /// `lease_start` is when the claim was sent; the lease is only trusted
    /// until `lease_start + lease_window`.
    async fn lead(&self, lease_start: Instant, shutdown: &mut watch::Receiver<bool>) -> Result<LeaseEnd> {
        let deadline = lease_start + self.config.lease_window();

        if Instant::now() >= deadline {
            warn!(
                late_ms = Instant::now().saturating_duration_since(deadline).as_millis() as u64,
                "Claim confirmed after the lease deadline, not activating"
            );
            self.release_lease().await;
            return Ok(LeaseEnd::Lost);
        }

        if let Err(e) = self.lifecycle.activate().await {
            // Never leave a broken instance holding the slot
            self.release_lease().await;
            return Err(e.into());
        }

        if Instant::now() >= deadline {
            warn!("Activation finished after the lease deadline, stepping down");
            self.lifecycle.passivate().await?;
            // The record may still be ours; free it for the next candidate
            self.release_lease().await;
            self.set_status(LeadershipStatus::Follower);
            return Ok(LeaseEnd::Lost);
        }
        self.set_status(LeadershipStatus::Leader);

        match self.hold_leadership(lease_start, shutdown).await {
            LeaseEnd::Shutdown => Ok(LeaseEnd::Shutdown),
            LeaseEnd::Lost => {
                self.lifecycle.passivate().await?;
                self.set_status(LeadershipStatus::Follower);
                Ok(LeaseEnd::Lost)
            }
        }
    }

    /// Renewal phase. Returns once leadership is lost or shutdown is requested.
    async fn hold_leadership(&self, lease_start: Instant, shutdown: &mut watch::Receiver<bool>) -> LeaseEnd {
        let window = self.config.lease_window();
        let mut deadline = lease_start + window;
        let mut next_renewal = lease_start + self.config.renewal_interval;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => return LeaseEnd::Shutdown,
                _ = sleep_until(next_renewal.min(deadline)) => {}
            }

            if Instant::now() >= deadline {
                warn!("Lease deadline passed without a successful renewal, stepping down");
                return LeaseEnd::Lost;
            }

            match self.renew(deadline, shutdown).await {
                Renewal::Renewed(sent) => {
                    deadline = sent + window;
                    next_renewal = sent + self.config.renewal_interval;
                }
                Renewal::Lost => return LeaseEnd::Lost,
                Renewal::Shutdown => return LeaseEnd::Shutdown,
            }
        }
    }

    /// One renewal, retried on store errors within budget and before `deadline`
    async fn renew(&self, deadline: Instant, shutdown: &mut watch::Receiver<bool>) -> Renewal {
        let retry_delay = self.config.backoff.initial;
        let mut failures = 0u32;

        loop {
            let sent = Instant::now();
            let limit = self.config.store_timeout.min(deadline.saturating_duration_since(sent));
            let outcome = self
                .call(limit, self.store.compare_and_swap(
                    &self.config.lease_key,
                    self.config.candidate_id.as_str(),
                    self.config.candidate_id.as_str(),
                    self.config.lease_ttl,
                ))
                .await;

            match outcome {
                Ok(SwapOutcome::Swapped) => {
                    debug!("Extended leadership lease");
                    return Renewal::Renewed(sent);
                }
                Ok(SwapOutcome::Mismatch(holder)) => {
                    warn!(%holder, "Leadership taken over by another candidate");
                    return Renewal::Lost;
                }
                Ok(SwapOutcome::NotFound) => {
                    warn!("Leadership lease expired before renewal");
                    return Renewal::Lost;
                }
                Err(e) => {
                    failures += 1;
                    let retry_at = Instant::now() + retry_delay;

                    if failures > self.config.renewal_retry_budget {
                        warn!(error = %e, failures, "Renewal retries exhausted, stepping down");
                        return Renewal::Lost;
                    }
                    if retry_at >= deadline {
                        warn!(error = %e, failures, "No time left before lease deadline, stepping down");
                        return Renewal::Lost;
                    }

                    warn!(error = %e, failures, "Failed to extend lease, retrying");
                    tokio::select! {
                        biased;
                        _ = shutdown_requested(shutdown) => return Renewal::Shutdown,
                        _ = sleep_until(retry_at) => {}
                    }
                }
            }
        }
    }

    /// Watch phase: return once the slot looks vacant, the store misbehaves,
    /// or shutdown is requested
    async fn wait_for_vacancy(&self, shutdown: &mut watch::Receiver<bool>) {
        let key = &self.config.lease_key;

        let mut events = match self.call(self.config.store_timeout, self.store.watch(key)).await {
            Ok(events) => events,
            Err(e) => {
                debug!(error = %e, "Watch unavailable, polling only");
                None
            }
        };

        let mut poll = tokio::time::interval_at(
            Instant::now() + self.config.poll_interval,
            self.config.poll_interval,
        );
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => return,
                event = next_event(&mut events) => match event {
                    Some(event) if event.is_vacancy() => {
                        debug!(?event, "Leadership slot vacated");
                        return;
                    }
                    Some(WatchEvent::Put(holder)) => debug!(%holder, "Leadership record changed"),
                    Some(_) => {}
                    None => {
                        debug!("Watch stream ended, polling only");
                        events = None;
                    }
                },
                _ = poll.tick() => match self.call(self.config.store_timeout, self.store.get(key)).await {
                    Ok(None) => return,
                    Ok(Some(holder)) if holder == self.config.candidate_id.as_str() => return,
                    Ok(Some(_)) => {}
                    Err(e) => {
                        debug!(error = %e, "Failed to read leadership record");
                        return;
                    }
                },
            }
        }
    }

    /// Shutdown sequence: passivate, then release whatever may still be ours
    async fn shut_down(&self, claim: Claim) -> Result<()> {
        info!(?claim, "Election loop shutting down");
        *self.run_state.lock() = RunState::Stopping;

        self.lifecycle.passivate().await?;

        if claim != Claim::None {
            self.release_lease().await;
        }
        self.set_status(LeadershipStatus::Follower);
        Ok(())
    }

    /// Best-effort conditional delete of the lease
    async fn release_lease(&self) {
        let released = self
            .call(self.config.store_timeout, self.store.compare_and_delete(
                &self.config.lease_key,
                self.config.candidate_id.as_str(),
            ))
            .await;

        match released {
            Ok(DeleteOutcome::Deleted) => info!("Released leadership"),
            Ok(outcome) => debug!(?outcome, "Leadership was already released"),
            Err(e) => warn!(error = %e, "Failed to release leadership, it will expire after the TTL"),
        }
    }

    /// Run a store call bounded by `limit`
    async fn call<T, F>(&self, limit: Duration, fut: F) -> std::result::Result<T, StoreError>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(limit)),
        }
    }

    fn set_status(&self, status: LeadershipStatus) {
        let previous = self.status_tx.send_replace(status);

        if previous != status {
            match status {
                LeadershipStatus::Leader => info!(candidate_id = %self.config.candidate_id, "Became leader"),
                _ if previous == LeadershipStatus::Leader => {
                    info!(candidate_id = %self.config.candidate_id, ?status, "No longer leader")
                }
                _ => debug!(?previous, ?status, "Leadership status changed"),
            }
        }
    }
}

/// Resolves once `stop()` has been called
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Sleep for `delay`; returns true if shutdown was requested first
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_requested(shutdown) => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

async fn next_event(events: &mut Option<WatchStream>) -> Option<WatchEvent> {
    match events.as_mut() {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
