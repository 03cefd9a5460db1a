//! Lifecycle notifications for runtime monitoring
//!
//! Nodes report their state transitions (`booting`, `booted`, `evaluated`) and
//! the signal router reports deliveries through an [`EventBus`] owned by the
//! run-context. There is no global bus: every scenario or session carries its
//! own.
//!
//! The `booting` notification is special: if the bus returns an error for it,
//! the node's boot is aborted and the node never reaches `Booted`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::node::NodeId;

/// Events emitted by the runtime for monitoring
#[derive(TS, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[ts(tag = "type", content = "data", export)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum RuntimeEvent {
    /// A scenario run started driving its entrance blocks
    RunStarted { run_id: Uuid },

    /// A scenario run has no more evaluations in flight
    RunCompleted { run_id: Uuid },

    /// A run-context was torn down
    RunClosed { run_id: Uuid },

    /// A node is about to run its boot hook
    NodeBooting { node_id: NodeId, run_id: Uuid },

    /// A node finished booting and can now evaluate
    NodeBooted { node_id: NodeId, run_id: Uuid },

    /// A node failed to boot and will never evaluate in this run
    NodeBootFailed {
        node_id: NodeId,
        run_id: Uuid,
        error: String,
    },

    /// A node completed its first evaluation of the run
    NodeEvaluated {
        node_id: NodeId,
        run_id: Uuid,
        success: bool,
    },

    /// A signal was handed to a downstream component anchor
    SignalDispatched {
        source: NodeId,
        source_anchor: String,
        target: NodeId,
        target_anchor: String,
    },

    /// A signal arrived at an anchor without a handler
    SignalDropped { target: NodeId, anchor: String },
}

/// Trait for emitting events from the runtime
///
/// Implementations of this trait handle the delivery of runtime events
/// to monitoring systems, logs, or other consumers.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Emit an event to the event bus
    ///
    /// # Errors
    /// Returns an error if the event cannot be emitted. For
    /// [`RuntimeEvent::NodeBooting`] an error aborts the node's boot.
    async fn emit(&self, event: RuntimeEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// No-op event bus for when events are not needed
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpEventBus;

#[async_trait]
impl EventBus for NoOpEventBus {
    async fn emit(&self, _event: RuntimeEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Event bus that collects events in memory
///
/// Useful for testing or for hosts that inspect a run after it finished.
#[derive(Debug, Default)]
pub struct MemoryEventBus {
    events: std::sync::Mutex<Vec<RuntimeEvent>>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn emit(&self, event: RuntimeEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
        Ok(())
    }
}

/// Event bus that forwards every event to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventBus;

#[async_trait]
impl EventBus for TracingEventBus {
    async fn emit(&self, event: RuntimeEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(?event, "runtime event");
        Ok(())
    }
}
