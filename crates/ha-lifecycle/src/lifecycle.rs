use std::fmt;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::{LifecycleError, Result};

/// Capability set the controlled instance implements.
///
/// Hooks are only ever called by [`InstanceLifecycle`], one at a time, in
/// transition order. Returning an error keeps the lifecycle in its current
/// state.
#[async_trait]
pub trait ControlledInstance: Send {
    /// Prepare resources. Called exactly once.
    async fn on_load(&mut self) -> anyhow::Result<()>;

    /// Stop serving and stay ready to take over.
    async fn on_passivate(&mut self) -> anyhow::Result<()>;

    /// Start serving. Only called while this process holds leadership.
    async fn on_activate(&mut self) -> anyhow::Result<()>;
}

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Unloaded,
    Loaded,
    Passive,
    Active,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unloaded => "Unloaded",
            LifecycleState::Loaded => "Loaded",
            LifecycleState::Passive => "Passive",
            LifecycleState::Active => "Active",
        };
        f.write_str(name)
    }
}

/// Transition requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Load,
    Passivate,
    Activate,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transition::Load => "load",
            Transition::Passivate => "passivate",
            Transition::Activate => "activate",
        };
        f.write_str(name)
    }
}

struct Guarded {
    state: LifecycleState,
    instance: Box<dyn ControlledInstance>,
}

/// Guarded state machine around a controlled instance
pub struct InstanceLifecycle {
    guarded: Mutex<Guarded>,
    state_tx: watch::Sender<LifecycleState>,
}

impl InstanceLifecycle {
    pub fn new(instance: Box<dyn ControlledInstance>) -> Self {
        let (state_tx, _) = watch::channel(LifecycleState::Unloaded);

        Self {
            guarded: Mutex::new(Guarded {
                state: LifecycleState::Unloaded,
                instance,
            }),
            state_tx,
        }
    }

    /// Current state, without waiting for an in-flight transition
    pub fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    /// Unloaded -> Loaded
    pub async fn load(&self) -> Result<()> {
        let mut guarded = self.guarded.lock().await;

        if guarded.state != LifecycleState::Unloaded {
            return Err(refuse(Transition::Load, guarded.state));
        }

        self.run_hook(&mut guarded, Transition::Load, LifecycleState::Loaded).await
    }

    /// Loaded | Active -> Passive. No-op when already Passive.
    pub async fn passivate(&self) -> Result<()> {
        let mut guarded = self.guarded.lock().await;

        match guarded.state {
            LifecycleState::Loaded | LifecycleState::Active => {}
            LifecycleState::Passive => {
                debug!("Already passive, nothing to do");
                return Ok(());
            }
            from @ LifecycleState::Unloaded => {
                return Err(refuse(Transition::Passivate, from));
            }
        }

        self.run_hook(&mut guarded, Transition::Passivate, LifecycleState::Passive).await
    }

    /// Passive -> Active
    pub async fn activate(&self) -> Result<()> {
        let mut guarded = self.guarded.lock().await;

        if guarded.state != LifecycleState::Passive {
            return Err(refuse(Transition::Activate, guarded.state));
        }

        self.run_hook(&mut guarded, Transition::Activate, LifecycleState::Active).await
    }

    async fn run_hook(
        &self,
        guarded: &mut Guarded,
        transition: Transition,
        target: LifecycleState,
    ) -> Result<()> {
        let from = guarded.state;

        let outcome = match transition {
            Transition::Load => guarded.instance.on_load().await,
            Transition::Passivate => guarded.instance.on_passivate().await,
            Transition::Activate => guarded.instance.on_activate().await,
        };

        if let Err(source) = outcome {
            warn!(%transition, %from, error = %source, "Controlled instance hook failed");
            return Err(LifecycleError::InstanceFailed { transition, source });
        }

        guarded.state = target;
        self.state_tx.send_replace(target);
        info!(%from, to = %target, "Lifecycle transition complete");

        Ok(())
    }
}

fn refuse(transition: Transition, from: LifecycleState) -> LifecycleError {
    LifecycleError::InvalidTransition { transition, from }
}
