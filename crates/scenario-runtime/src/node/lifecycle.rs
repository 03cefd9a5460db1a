use std::future::Future;

use tokio::sync::watch;
use uuid::Uuid;

use crate::events::{EventBus, RuntimeEvent};
use crate::node::NodeId;

/// Errors that keep a node from reaching [`LifecycleState::Booted`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BootError {
    #[error("Booting was interrupted: {0}")]
    Interrupted(String),

    #[error("Boot failed: {0}")]
    Failed(String),

    #[error("Boot hook panicked: {0}")]
    Panicked(String),

    #[error("The run was closed before the node booted")]
    RunClosed,
}

impl From<Box<dyn std::error::Error + Send + Sync>> for BootError {
    fn from(error: Box<dyn std::error::Error + Send + Sync>) -> Self {
        BootError::Failed(error.to_string())
    }
}

/// Boot state of a node instance
///
/// `Created -> Booting -> Booted`, or `Booting -> Failed`. Both `Booted` and
/// `Failed` are terminal for the lifetime of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Booting,
    Booted,
    Failed(BootError),
}

impl LifecycleState {
    pub fn is_booted(&self) -> bool {
        matches!(self, LifecycleState::Booted)
    }

    /// Whether booting has finished, successfully or not
    pub fn is_settled(&self) -> bool {
        matches!(self, LifecycleState::Booted | LifecycleState::Failed(_))
    }
}

/// Boot-once gate shared by every node type
///
/// The gate only records state; it never starts booting on its own. Waiters
/// subscribe to the underlying watch channel and resume once the state is
/// settled.
#[derive(Debug)]
pub struct BootGate {
    state: watch::Sender<LifecycleState>,
}

impl Default for BootGate {
    fn default() -> Self {
        Self::new()
    }
}

impl BootGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Created);
        Self { state }
    }

    pub fn state(&self) -> LifecycleState {
        self.state.borrow().clone()
    }

    /// Move from `Created` to `Booting`. Returns false if booting already started.
    pub(crate) fn begin(&self) -> bool {
        self.state.send_if_modified(|state| {
            if matches!(state, LifecycleState::Created) {
                *state = LifecycleState::Booting;
                true
            } else {
                false
            }
        })
    }

    /// Settle a `Booting` gate. Returns false if the gate was not booting.
    pub(crate) fn settle(&self, result: Result<(), BootError>) -> bool {
        self.state.send_if_modified(|state| {
            if !matches!(state, LifecycleState::Booting) {
                return false;
            }

            *state = match result {
                Ok(()) => LifecycleState::Booted,
                Err(error) => LifecycleState::Failed(error),
            };
            true
        })
    }

    /// Wait until booting has settled
    ///
    /// Resolves immediately when the node already booted (or failed). When
    /// booting never starts this never resolves; callers race it against the
    /// run's teardown signal.
    pub async fn wait(&self) -> Result<(), BootError> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(LifecycleState::is_settled)
            .await
            .map_err(|_| BootError::RunClosed)?;

        match &*state {
            LifecycleState::Failed(error) => Err(error.clone()),
            _ => Ok(()),
        }
    }
}

/// Run the boot sequence for a node exactly once
///
/// The first caller emits the `booting` notification (which the event bus may
/// veto by returning an error), runs the type-specific hook, settles the gate
/// and emits `booted`. Every later or concurrent caller skips all of that and
/// just waits for the outcome of the first.
pub(crate) async fn drive_boot<F>(
    gate: &BootGate,
    event_bus: &dyn EventBus,
    node_id: &NodeId,
    run_id: Uuid,
    hook: F,
) -> Result<(), BootError>
where
    F: Future<Output = Result<(), BootError>>,
{
    if !gate.begin() {
        tracing::trace!("Node {node_id} is already booting, waiting for it to settle");
        return gate.wait().await;
    }

    tracing::trace!("Booting node {node_id} in run {run_id}");

    let booting = event_bus
        .emit(RuntimeEvent::NodeBooting {
            node_id: node_id.clone(),
            run_id,
        })
        .await;

    let result = match booting {
        Ok(()) => hook.await,
        Err(e) => Err(BootError::Interrupted(e.to_string())),
    };

    gate.settle(result.clone());

    match &result {
        Ok(()) => {
            tracing::trace!("Node {node_id} booted");
            let _ = event_bus
                .emit(RuntimeEvent::NodeBooted {
                    node_id: node_id.clone(),
                    run_id,
                })
                .await;
        }
        Err(error) => {
            tracing::warn!("Node {node_id} failed to boot: {error}");
            let _ = event_bus
                .emit(RuntimeEvent::NodeBootFailed {
                    node_id: node_id.clone(),
                    run_id,
                    error: error.to_string(),
                })
                .await;
        }
    }

    result
}
